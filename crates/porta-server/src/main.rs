use clap::Parser;
use porta_common::ShutdownSignal;
use porta_core::Config;
use porta_server::{build_instances, settings, startup};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = settings::Cli::parse();
    let layered = settings::load(&cli)?;

    let _logging_guard = startup::init_logging(&startup::LoggingConfig::from_env())?;
    porta_core::metrics::init_metrics();

    let base = Config::from_settings(&layered)?;
    let instances = build_instances(&base, &cli.replicas)?;

    let running = ShutdownSignal::new();
    for instance in &instances {
        let completed = instance.config();
        info!(
            address = %completed.public_address(),
            reconciler = %completed.endpoint_reconciler_type(),
            hooks = ?instance.hook_names(),
            "Starting Porta instance"
        );
        instance.post_start(&running);
    }

    startup::wait_for_shutdown_signal().cancelled().await;

    for instance in &instances {
        instance.pre_shutdown().await;
    }
    running.shutdown();

    info!("Porta stopped");
    Ok(())
}
