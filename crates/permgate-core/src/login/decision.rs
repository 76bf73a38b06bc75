//! The mutable allow/deny outcome carried by a connection phase.

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LoginResult {
    #[default]
    Allowed,
    Denied { by: String, message: String },
}

impl LoginResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Shared result of one phase. Once denied, further denies keep the first
/// message; only [`LoginDecision::override_result`] can re-allow.
#[derive(Debug, Clone, Default)]
pub struct LoginDecision {
    result: LoginResult,
}

impl LoginDecision {
    pub fn new() -> Self {
        Self::default()
    }

    /// A decision that arrives already denied by an upstream component.
    pub fn denied(by: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            result: LoginResult::Denied {
                by: by.into(),
                message: message.into(),
            },
        }
    }

    pub fn result(&self) -> &LoginResult {
        &self.result
    }

    pub fn is_allowed(&self) -> bool {
        self.result.is_allowed()
    }

    /// Returns `false` if the decision was already denied.
    pub fn deny(&mut self, by: &str, message: impl Into<String>) -> bool {
        if !self.is_allowed() {
            return false;
        }
        self.result = LoginResult::Denied {
            by: by.to_string(),
            message: message.into(),
        };
        true
    }

    /// Raw overwrite, available to legacy listeners and the host only.
    pub fn override_result(&mut self, result: LoginResult) {
        self.result = result;
    }

    pub fn into_result(self) -> LoginResult {
        self.result
    }
}

/// What a regular stage sees: it may read the decision and deny, never allow.
pub struct DenyOnly<'a> {
    stage: &'a str,
    decision: &'a mut LoginDecision,
}

impl<'a> DenyOnly<'a> {
    pub fn new(stage: &'a str, decision: &'a mut LoginDecision) -> Self {
        Self { stage, decision }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision.is_allowed()
    }

    pub fn is_denied(&self) -> bool {
        !self.decision.is_allowed()
    }

    pub fn result(&self) -> &LoginResult {
        self.decision.result()
    }

    pub fn deny(&mut self, message: impl Into<String>) -> bool {
        self.decision.deny(self.stage, message)
    }
}
