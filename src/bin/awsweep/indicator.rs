//! Progress indicator and end-of-run summary for the CLI.
//!
//! Consumes the pipeline statistics channel: a spinner with live counters
//! while the sweep runs (interactive terminals only), and a one-line
//! summary when it finishes.

use std::io::IsTerminal;

use async_channel::Receiver;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinHandle;
use tracing::info;

use awsweep::Config;
use awsweep::types::SweepStatistics;

/// The spinner is only useful on an interactive terminal, and would corrupt
/// JSON log output.
pub fn is_progress_indicator_needed(config: &Config) -> bool {
    if config.show_no_progress {
        return false;
    }
    if config
        .tracing_config
        .is_some_and(|tc| tc.json_tracing)
    {
        return false;
    }
    std::io::stdout().is_terminal()
}

#[derive(Debug, Default)]
struct Counters {
    removed: u64,
    skipped: u64,
    failed: u64,
    regions_skipped: u64,
}

impl Counters {
    fn apply(&mut self, stats: &SweepStatistics) {
        match stats {
            SweepStatistics::RemoveComplete { .. } => self.removed += 1,
            SweepStatistics::RemoveSkip { .. } => self.skipped += 1,
            SweepStatistics::RemoveError { .. } => self.failed += 1,
            SweepStatistics::ListSkip { .. } => self.regions_skipped += 1,
        }
    }

    fn render(&self, dry_run: bool) -> String {
        let suffix = if dry_run { " (dry-run)" } else { "" };
        format!(
            "removed: {}, skipped: {}, failed: {}{}",
            self.removed, self.skipped, self.failed, suffix
        )
    }
}

/// Spawn the indicator task. It finishes when the stats channel closes.
pub fn show_indicator(
    stats_receiver: Receiver<SweepStatistics>,
    progress_needed: bool,
    log_summary: bool,
    dry_run: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let progress_bar = if progress_needed {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.enable_steady_tick(std::time::Duration::from_millis(120));
            Some(bar)
        } else {
            None
        };

        let mut counters = Counters::default();

        while let Ok(stats) = stats_receiver.recv().await {
            counters.apply(&stats);
            if let Some(bar) = &progress_bar {
                bar.set_message(counters.render(dry_run));
            }
        }

        if let Some(bar) = &progress_bar {
            bar.finish_and_clear();
        }

        if log_summary {
            info!(
                removed = counters.removed,
                skipped = counters.skipped,
                failed = counters.failed,
                dry_run = dry_run,
                "sweep summary."
            );
            println!("{}", counters.render(dry_run));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn indicator_drains_channel_and_finishes() {
        let (sender, receiver) = async_channel::unbounded();

        sender
            .send(SweepStatistics::RemoveComplete {
                resource_type: "SNSTopic",
                id: "arn:aws:sns:us-east-1:123456789012:alerts".to_string(),
            })
            .await
            .unwrap();
        sender
            .send(SweepStatistics::RemoveSkip {
                resource_type: "KMSAlias",
                id: "alias/aws/s3".to_string(),
                reason: "AWS-managed alias".to_string(),
            })
            .await
            .unwrap();
        sender.close();

        // No progress bar, no summary output: just verify clean termination.
        show_indicator(receiver, false, false, false)
            .await
            .unwrap();
    }

    #[test]
    fn counters_tally_event_kinds() {
        let mut counters = Counters::default();
        counters.apply(&SweepStatistics::RemoveComplete {
            resource_type: "SNSTopic",
            id: "a".to_string(),
        });
        counters.apply(&SweepStatistics::RemoveError {
            resource_type: "SNSTopic",
            id: "b".to_string(),
        });
        counters.apply(&SweepStatistics::ListSkip {
            resource_type: "AppMeshMesh",
            region: "eu-south-2".to_string(),
            reason: "not available".to_string(),
        });

        assert_eq!(counters.removed, 1);
        assert_eq!(counters.failed, 1);
        assert_eq!(counters.regions_skipped, 1);
        assert_eq!(counters.render(true), "removed: 1, skipped: 0, failed: 1 (dry-run)");
    }
}
