use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use tracing::{debug, error, trace};

use awsweep::config::Config;
use awsweep::types::error::SweepError;
use awsweep::{
    CLIArgs, SweepPipeline, create_pipeline_cancellation_token, exit_code_from_error,
    is_cancelled_error,
};

mod ctrl_c_handler;
pub mod indicator;
mod tracing_init;

const EXIT_CODE_WARNING: i32 = 3;

/// awsweep - AWS account resource sweeper.
///
/// This binary is a thin wrapper over the awsweep library.
/// All core functionality is implemented in the library crate.
#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config_exit_if_err();

    if let Some(shell) = config.auto_complete_shell {
        generate(
            shell,
            &mut CLIArgs::command(),
            "awsweep",
            &mut std::io::stdout(),
        );

        return Ok(());
    }

    start_tracing_if_necessary(&config);

    trace!("config = {:?}", config);

    run(config).await
}

fn load_config_exit_if_err() -> Config {
    let config = Config::try_from(CLIArgs::parse());
    if let Err(error_message) = config {
        clap::Error::raw(clap::error::ErrorKind::ValueValidation, error_message).exit();
    }
    config.unwrap()
}

fn start_tracing_if_necessary(config: &Config) -> bool {
    if config.tracing_config.is_none() {
        return false;
    }

    tracing_init::init_tracing(config.tracing_config.as_ref().unwrap());
    true
}

async fn run(config: Config) -> Result<()> {
    let cancellation_token = create_pipeline_cancellation_token();

    ctrl_c_handler::spawn_ctrl_c_handler(cancellation_token.clone());

    let start_time = tokio::time::Instant::now();
    debug!("sweep pipeline start.");

    let mut pipeline = SweepPipeline::new(config.clone(), cancellation_token).await?;
    let indicator_join_handle = indicator::show_indicator(
        pipeline.get_stats_receiver(),
        indicator::is_progress_indicator_needed(&config),
        config.log_sweep_summary,
        config.dry_run,
    );

    pipeline.run().await;
    pipeline.close_stats_sender();
    indicator_join_handle.await?;

    let duration_sec = format!("{:.3}", start_time.elapsed().as_secs_f32());

    if pipeline.has_error() {
        let errors = pipeline.get_errors_and_consume().unwrap();
        for err in &errors {
            if is_cancelled_error(err) {
                debug!("sweep cancelled by user.");
                return Ok(());
            }
            error!("{}", err);
        }
        error!(duration_sec = duration_sec, "awsweep failed.");
        std::process::exit(exit_code_from_error(&errors[0]));
    }

    debug!(duration_sec = duration_sec, "awsweep has been completed.");

    if pipeline.has_warning() {
        let stats = pipeline.stats();
        error!(
            "{}",
            SweepError::PartialFailure {
                removed: stats.removed,
                failed: stats.failed,
            }
        );
        std::process::exit(EXIT_CODE_WARNING);
    }

    Ok(())
}
