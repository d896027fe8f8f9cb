use anyhow::Error;
use thiserror::Error;

/// Application-level error types for awsweep.
///
/// These represent errors raised during scanning, removal, configuration,
/// and user interaction.
///
/// ## Exit Codes
///
/// Each variant maps to an exit code (via `exit_code()`):
/// - 0: Non-error conditions (Cancelled, DryRun)
/// - 1: General errors (AwsSdk, Io, Pipeline)
/// - 2: Configuration / guard errors (InvalidConfig, InvalidRegex, AccountGuard)
/// - 3: Partial failure (some resources removed, some failed)
#[derive(Error, Debug, PartialEq)]
pub enum SweepError {
    /// AWS SDK error (retry policy is the SDK's concern).
    #[error("AWS SDK error: {0}")]
    AwsSdk(String),

    /// Configuration error (non-retryable).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid regex pattern.
    #[error("Invalid regex pattern: {0}")]
    InvalidRegex(String),

    /// Refusing to sweep the resolved account (blocklisted or mismatched).
    #[error("Account guard: {0}")]
    AccountGuard(String),

    /// A lister signalled that its resource type is not available in the
    /// requested region. The scanner logs this and moves on; it must never
    /// be treated as a hard failure.
    #[error("Skipping {resource_type}: {reason}")]
    ListSkip {
        resource_type: String,
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Operation cancelled by user.
    #[error("Operation cancelled by user")]
    Cancelled,

    /// Dry-run mode — no removals performed.
    #[error("Dry-run mode - no removals performed")]
    DryRun,

    /// Partial failure during the sweep.
    #[error("Partial failure: {removed} removed, {failed} failed")]
    PartialFailure { removed: u64, failed: u64 },

    /// General pipeline error.
    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

impl SweepError {
    /// Get the appropriate process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            SweepError::Cancelled | SweepError::DryRun => 0,
            SweepError::InvalidConfig(_)
            | SweepError::InvalidRegex(_)
            | SweepError::AccountGuard(_) => 2,
            SweepError::PartialFailure { .. } => 3,
            _ => 1,
        }
    }
}

/// Check if an anyhow::Error wraps a cancellation error.
pub fn is_cancelled_error(e: &Error) -> bool {
    if let Some(err) = e.downcast_ref::<SweepError>() {
        return *err == SweepError::Cancelled;
    }
    false
}

/// Check if an anyhow::Error wraps a soft-skip signal from a lister.
///
/// Soft skips mean "this resource type has nothing to do in this region"
/// (API not supported, opt-in region, etc.) as opposed to a real failure.
pub fn is_skip_error(e: &Error) -> bool {
    matches!(
        e.downcast_ref::<SweepError>(),
        Some(SweepError::ListSkip { .. })
    )
}

/// Extract the exit code from an anyhow::Error, defaulting to 1.
pub fn exit_code_from_error(e: &Error) -> i32 {
    if let Some(err) = e.downcast_ref::<SweepError>() {
        return err.exit_code();
    }
    1
}
