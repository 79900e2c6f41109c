//! Explicit operator confirmation for destructive actions.

/// Asks the operator to confirm an action before it is issued.
pub trait Confirm: Send + Sync {
    /// Returns `true` if the operator approved `prompt`.
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F> Confirm for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

/// Approves every prompt. Used when the operator passed `--yes`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

impl Confirm for AutoConfirm {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

/// Result of a confirmed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The request was issued and accepted.
    Completed,
    /// The operator declined; nothing was sent.
    Declined,
}
