//! Tri-state verdicts and their provenance.
//!
//! `Undefined` means "no processor had an opinion"; it is never shown to a
//! user as a value and resolution falls through when it is returned.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Verdict for a single permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tristate {
    Allow,
    Deny,
    #[default]
    Undefined,
}

impl Tristate {
    pub fn from_bool(value: bool) -> Self {
        if value {
            Self::Allow
        } else {
            Self::Deny
        }
    }

    /// Collapses to a boolean; `Undefined` counts as not granted.
    pub fn as_bool(self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn is_defined(self) -> bool {
        !matches!(self, Self::Undefined)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Undefined => "undefined",
        }
    }
}

impl From<bool> for Tristate {
    fn from(value: bool) -> Self {
        Self::from_bool(value)
    }
}

impl From<Option<bool>> for Tristate {
    fn from(value: Option<bool>) -> Self {
        value.map(Self::from_bool).unwrap_or(Self::Undefined)
    }
}

impl fmt::Display for Tristate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A verdict plus the processor that produced it.
///
/// Provenance is diagnostic only; equality of two results for correctness
/// purposes should compare [`TristateResult::verdict`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TristateResult {
    verdict: Tristate,
    #[serde(skip_serializing_if = "Option::is_none")]
    processor: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cause: Option<Cow<'static, str>>,
}

impl TristateResult {
    pub const UNDEFINED: TristateResult = TristateResult {
        verdict: Tristate::Undefined,
        processor: None,
        cause: None,
    };

    /// An undefined result that still records why nothing was resolved.
    pub fn unresolved(cause: impl Into<Cow<'static, str>>) -> Self {
        Self {
            verdict: Tristate::Undefined,
            processor: None,
            cause: Some(cause.into()),
        }
    }

    pub fn verdict(&self) -> Tristate {
        self.verdict
    }

    pub fn processor(&self) -> Option<&'static str> {
        self.processor
    }

    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    /// One-line provenance for verbose output, e.g. `allow (defaults: permission map)`.
    pub fn describe(&self) -> String {
        match (self.processor, self.cause.as_deref()) {
            (Some(p), Some(c)) => format!("{} ({}: {})", self.verdict, p, c),
            (Some(p), None) => format!("{} ({})", self.verdict, p),
            (None, Some(c)) => format!("{} ({})", self.verdict, c),
            (None, None) => self.verdict.to_string(),
        }
    }
}

impl Default for TristateResult {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

/// Stamps results with a fixed processor name and cause.
#[derive(Debug, Clone, Copy)]
pub struct ResultFactory {
    processor: &'static str,
    cause: &'static str,
}

impl ResultFactory {
    pub const fn new(processor: &'static str, cause: &'static str) -> Self {
        Self { processor, cause }
    }

    pub fn result(&self, verdict: Tristate) -> TristateResult {
        if verdict == Tristate::Undefined {
            return TristateResult::UNDEFINED;
        }
        TristateResult {
            verdict,
            processor: Some(self.processor),
            cause: Some(Cow::Borrowed(self.cause)),
        }
    }
}
