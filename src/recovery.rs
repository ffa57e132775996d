/// What to do after an action failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Scroll the page and carry on with the next step.
    Scroll,
    /// Give the page time to settle and carry on.
    WaitForNavigation,
    /// Stop the task.
    Abort,
}

impl Recovery {
    pub fn is_retry(self) -> bool {
        !matches!(self, Recovery::Abort)
    }
}

/// Checked in order; the first signal found in the error message wins.
pub const RECOVERY_RULES: &[(&str, Recovery)] = &[
    ("element not found", Recovery::Scroll),
    ("not visible", Recovery::Scroll),
    ("navigation", Recovery::WaitForNavigation),
];

pub fn classify(message: &str) -> Recovery {
    RECOVERY_RULES
        .iter()
        .find(|(signal, _)| message.contains(signal))
        .map_or(Recovery::Abort, |(_, recovery)| *recovery)
}
