//! Ordered verdict sources.
//!
//! A [`PermissionCalculator`] asks each processor in turn; the first one that
//! returns a defined verdict wins. Unknown or malformed permission strings
//! are never an error, they resolve to `Undefined`.

mod assigned;
mod defaults;

pub use assigned::AssignedProcessor;
pub use defaults::{
    DefaultPermissionMap, DefaultsProcessor, PermissionDefault, PermissionRegistry,
    RegisteredPermission,
};

use crate::tristate::TristateResult;
use std::fmt;

pub trait PermissionProcessor: Send + Sync + fmt::Debug {
    /// `permission` is already trimmed and lower-cased.
    fn has_permission(&self, permission: &str) -> TristateResult;
}

/// A fixed processor chain for one subject in one context.
#[derive(Debug, Default)]
pub struct PermissionCalculator {
    processors: Vec<Box<dyn PermissionProcessor>>,
}

impl PermissionCalculator {
    pub fn new(processors: Vec<Box<dyn PermissionProcessor>>) -> Self {
        Self { processors }
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn check(&self, permission: &str) -> TristateResult {
        let permission = permission.trim().to_lowercase();
        if permission.is_empty() {
            return TristateResult::UNDEFINED;
        }
        for processor in &self.processors {
            let result = processor.has_permission(&permission);
            if result.verdict().is_defined() {
                return result;
            }
        }
        TristateResult::UNDEFINED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tristate::{ResultFactory, Tristate};
    use std::collections::HashMap;

    #[derive(Debug)]
    struct Fixed {
        factory: ResultFactory,
        answers: HashMap<&'static str, Tristate>,
    }

    impl Fixed {
        fn boxed(name: &'static str, answers: &[(&'static str, Tristate)]) -> Box<dyn PermissionProcessor> {
            Box::new(Self {
                factory: ResultFactory::new(name, "fixed"),
                answers: answers.iter().copied().collect(),
            })
        }
    }

    impl PermissionProcessor for Fixed {
        fn has_permission(&self, permission: &str) -> TristateResult {
            self.factory.result(
                self.answers
                    .get(permission)
                    .copied()
                    .unwrap_or(Tristate::Undefined),
            )
        }
    }

    fn chain() -> PermissionCalculator {
        PermissionCalculator::new(vec![
            Fixed::boxed("first", &[("a", Tristate::Deny)]),
            Fixed::boxed("second", &[("a", Tristate::Allow), ("b", Tristate::Allow)]),
            Fixed::boxed("third", &[("c", Tristate::Deny)]),
        ])
    }

    #[test]
    fn test_first_defined_verdict_wins() {
        let calc = chain();
        let a = calc.check("a");
        assert_eq!(a.verdict(), Tristate::Deny);
        assert_eq!(a.processor(), Some("first"));

        let b = calc.check("b");
        assert_eq!(b.verdict(), Tristate::Allow);
        assert_eq!(b.processor(), Some("second"));

        assert_eq!(calc.check("c").processor(), Some("third"));
    }

    #[test]
    fn test_all_undefined_falls_through() {
        assert_eq!(chain().check("unknown.node"), TristateResult::UNDEFINED);
    }

    #[test]
    fn test_malformed_permissions_are_undefined() {
        let calc = chain();
        assert_eq!(calc.check(""), TristateResult::UNDEFINED);
        assert_eq!(calc.check("   "), TristateResult::UNDEFINED);
        assert_eq!(calc.check("..**..").verdict(), Tristate::Undefined);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(chain().check(" B ").verdict(), Tristate::Allow);
    }

    #[test]
    fn test_empty_chain() {
        let calc = PermissionCalculator::default();
        assert!(calc.is_empty());
        assert_eq!(calc.check("a"), TristateResult::UNDEFINED);
    }
}
