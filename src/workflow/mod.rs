//! Declarative state machines for workflow resources.
//!
//! Each resource declares a static transition table `(from, action) -> to`;
//! one shared evaluator answers every "is this transition legal" question and
//! produces the INVALID_STATUS error when it is not.

/// A workflow status enum that can name itself on the wire
pub trait WorkflowState: Copy + PartialEq {
    fn as_str(&self) -> &'static str;
}

/// A workflow action with the verb used in error messages ("check in", "sign")
pub trait WorkflowAction: Copy + PartialEq {
    fn verb(&self) -> &'static str;
}

/// Illegal transition: `action` is not permitted from `state`
#[derive(Debug)]
pub struct WorkflowError {
    pub entity: &'static str,
    pub state: String,
    pub action: &'static str,
}

/// Static transition table consumed by `apply`
pub struct TransitionTable<S: 'static, A: 'static> {
    pub entity: &'static str,
    pub rules: &'static [(S, A, S)],
}

impl<S: WorkflowState, A: WorkflowAction> TransitionTable<S, A> {
    pub const fn new(entity: &'static str, rules: &'static [(S, A, S)]) -> Self {
        Self { entity, rules }
    }

    /// Resolve the target state, or fail without touching anything
    pub fn apply(&self, current: S, action: A) -> Result<S, WorkflowError> {
        self.rules
            .iter()
            .find(|(from, act, _)| *from == current && *act == action)
            .map(|(_, _, to)| *to)
            .ok_or_else(|| WorkflowError {
                entity: self.entity,
                state: current.as_str().to_string(),
                action: action.verb(),
            })
    }

    /// True when `action` is legal from `current`
    pub fn permits(&self, current: S, action: A) -> bool {
        self.rules
            .iter()
            .any(|(from, act, _)| *from == current && *act == action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum S {
        Draft,
        Signed,
    }

    impl WorkflowState for S {
        fn as_str(&self) -> &'static str {
            match self {
                S::Draft => "DRAFT",
                S::Signed => "SIGNED",
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum A {
        Sign,
    }

    impl WorkflowAction for A {
        fn verb(&self) -> &'static str {
            "sign"
        }
    }

    static TABLE: TransitionTable<S, A> = TransitionTable::new("note", &[(S::Draft, A::Sign, S::Signed)]);

    #[test]
    fn legal_transition_resolves_target() {
        assert_eq!(TABLE.apply(S::Draft, A::Sign).unwrap(), S::Signed);
        assert!(TABLE.permits(S::Draft, A::Sign));
    }

    #[test]
    fn illegal_transition_reports_state_and_verb() {
        let err = TABLE.apply(S::Signed, A::Sign).unwrap_err();
        assert_eq!(err.entity, "note");
        assert_eq!(err.state, "SIGNED");
        assert_eq!(err.action, "sign");
        assert!(!TABLE.permits(S::Signed, A::Sign));
    }
}
