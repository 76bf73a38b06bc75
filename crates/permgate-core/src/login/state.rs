use crate::errors::TransitionError;
use serde::Serialize;

/// Lifecycle of one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    PreAuthPending,
    PreAuthDone,
    FinalizePending,
    Attached,
    DetachPending,
    Closed,
    /// Absorbing; reachable from any state before `Attached`.
    Aborted,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Aborted)
    }

    pub fn can_advance(self, next: Self) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (PreAuthPending, PreAuthDone)
                | (PreAuthDone, FinalizePending)
                | (FinalizePending, Attached)
                | (Attached, DetachPending)
                | (DetachPending, Closed)
                | (PreAuthPending | PreAuthDone | FinalizePending, Aborted)
        )
    }

    pub fn advance(&mut self, next: Self) -> Result<(), TransitionError> {
        if !self.can_advance(next) {
            return Err(TransitionError { from: *self, to: next });
        }
        *self = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachState {
    #[default]
    Unattached,
    Attached,
    Detached,
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut state = PreAuthPending;
        for next in [PreAuthDone, FinalizePending, Attached, DetachPending, Closed] {
            state.advance(next).unwrap();
        }
        assert!(state.is_terminal());
    }

    #[test]
    fn test_abort_only_before_attach() {
        for from in [PreAuthPending, PreAuthDone, FinalizePending] {
            assert!(from.can_advance(Aborted));
        }
        for from in [Attached, DetachPending, Closed, Aborted] {
            assert!(!from.can_advance(Aborted));
        }
    }

    #[test]
    fn test_rejects_skips() {
        let mut state = PreAuthPending;
        let err = state.advance(Attached).unwrap_err();
        assert_eq!(err.from, PreAuthPending);
        assert_eq!(err.to, Attached);
        assert_eq!(state, PreAuthPending);
    }
}
