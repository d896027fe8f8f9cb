//! Safety features for awsweep sweep operations.
//!
//! Implements safeguards against sweeping the wrong account:
//! - Account blocklist: refuse to run against blocklisted account IDs
//! - Expected-account check: `--account-id` must match the resolved identity
//! - Confirmation prompt: requires typing the target account ID
//! - Force flag: skips confirmation prompts
//! - Non-TTY / JSON-logging detection: skips prompts in non-interactive runs
//!
//! Dry-run mode skips confirmation: the pipeline runs fully (listing,
//! filtering) but the removal layer simulates removals.

use std::io::{BufRead, IsTerminal, Write};

use anyhow::{Result, anyhow};

use crate::config::Config;
use crate::types::error::SweepError;

/// Verify the resolved account against the blocklist and the expected
/// account ID.
///
/// This check is unconditional: neither `--force` nor dry-run bypasses it.
pub fn check_account(account_id: &str, config: &Config) -> Result<()> {
    if config.blocklist.iter().any(|blocked| blocked == account_id) {
        return Err(anyhow!(SweepError::AccountGuard(format!(
            "account {account_id} is blocklisted"
        ))));
    }

    if let Some(expected) = &config.account_id {
        if expected != account_id {
            return Err(anyhow!(SweepError::AccountGuard(format!(
                "credentials resolve to account {account_id}, expected {expected}"
            ))));
        }
    }

    Ok(())
}

/// Trait for handling user prompts, enabling testability.
///
/// The default implementation ([`StdioPromptHandler`]) uses stdin/stdout.
pub trait PromptHandler: Send + Sync {
    /// Display the confirmation prompt and read a line of user input.
    ///
    /// Returns the trimmed user input string.
    fn read_confirmation(&self, account_id: &str) -> Result<String>;

    /// Check if the current environment supports interactive prompts.
    fn is_interactive(&self) -> bool;
}

/// Default prompt handler using stdin/stdout.
pub struct StdioPromptHandler;

impl PromptHandler for StdioPromptHandler {
    fn read_confirmation(&self, account_id: &str) -> Result<String> {
        print!("Type the account ID ({account_id}) to confirm the sweep: ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().lock().read_line(&mut input)?;
        Ok(input.trim().to_string())
    }

    fn is_interactive(&self) -> bool {
        std::io::stdin().is_terminal() && std::io::stdout().is_terminal()
    }
}

/// Safety checker that validates preconditions before a sweep.
///
/// Decision flow:
/// 1. Dry-run mode → proceed (removals are simulated)
/// 2. Force flag → proceed
/// 3. Non-interactive environment or JSON logging → proceed
/// 4. Prompt: the user must type the target account ID exactly
pub struct SafetyChecker {
    account_id: String,
    dry_run: bool,
    force: bool,
    json_logging: bool,
    prompt_handler: Box<dyn PromptHandler>,
}

impl SafetyChecker {
    pub fn new(config: &Config, account_id: &str) -> Self {
        Self::with_prompt_handler(config, account_id, Box::new(StdioPromptHandler))
    }

    /// Create a SafetyChecker with a custom prompt handler (for testing).
    pub fn with_prompt_handler(
        config: &Config,
        account_id: &str,
        prompt_handler: Box<dyn PromptHandler>,
    ) -> Self {
        let json_logging = config
            .tracing_config
            .map(|tc| tc.json_tracing)
            .unwrap_or(false);

        Self {
            account_id: account_id.to_string(),
            dry_run: config.dry_run,
            force: config.force,
            json_logging,
            prompt_handler,
        }
    }

    /// Check all confirmation preconditions before starting a sweep.
    ///
    /// Returns `Err(SweepError::Cancelled)` if the user declines.
    pub fn check_before_sweep(&self) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }

        if self.force {
            return Ok(());
        }

        if self.should_skip_prompt() {
            return Ok(());
        }

        self.prompt_confirmation()
    }

    fn should_skip_prompt(&self) -> bool {
        // JSON logging would be corrupted by an interactive prompt.
        if self.json_logging {
            return true;
        }

        if !self.prompt_handler.is_interactive() {
            return true;
        }

        false
    }

    fn prompt_confirmation(&self) -> Result<()> {
        let input = self.prompt_handler.read_confirmation(&self.account_id)?;

        if input != self.account_id {
            return Err(anyhow!(SweepError::Cancelled));
        }

        Ok(())
    }
}
