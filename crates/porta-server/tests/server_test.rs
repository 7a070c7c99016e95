//! The shipped settings file driving in-process replicas end to end

use std::time::Duration;

use clap::Parser;
use porta_common::ShutdownSignal;
use porta_core::reconciler::{ReconcileOutcome, ReconcilerType};
use porta_core::{Config, ControllerState};
use porta_server::build_instances;
use porta_server::settings::{self, Cli};

fn shipped_config(extra: &[&str]) -> (Cli, Config) {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/conf/porta.yml");
    let args = ["porta-server", "--config", path, "--public-address", "10.0.0.1"];
    let cli = Cli::parse_from(args.iter().chain(extra).copied());
    let layered = settings::load(&cli).unwrap();
    let config = Config::from_settings(&layered).unwrap();
    (cli, config)
}

#[test]
fn test_shipped_settings_complete_for_every_reconciler() {
    for (name, expected) in [
        ("lease", ReconcilerType::Lease),
        ("master-count", ReconcilerType::MasterCount),
        ("none", ReconcilerType::None),
    ] {
        let (_, config) = shipped_config(&["--reconciler", name]);
        let completed = config.complete().unwrap();
        assert_eq!(completed.endpoint_reconciler_type(), expected);
        assert_eq!(completed.endpoint_reconciler_interval(), Duration::from_secs(10));
        assert_eq!(completed.endpoint_reconciler_ttl(), Duration::from_secs(15));
        assert_eq!(completed.public_service_port(), 6443);
    }
}

#[tokio::test(start_paused = true)]
async fn test_replicas_publish_and_withdraw() {
    let (cli, config) = shipped_config(&["--replica", "10.0.0.2"]);
    let instances = build_instances(&config, &cli.replicas).unwrap();
    assert_eq!(instances.len(), 2);
    assert_eq!(
        instances[1].config().public_address(),
        "10.0.0.2".parse::<std::net::IpAddr>().unwrap()
    );

    let running = ShutdownSignal::new();
    for instance in &instances {
        assert!(instance.post_start(&running));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let outcomes: Vec<_> = instances
        .iter()
        .map(|i| i.controller().last_outcome())
        .collect();
    assert!(outcomes.iter().all(|o| matches!(o, Some(Ok(_)))));
    assert!(outcomes.contains(&Some(Ok(ReconcileOutcome::Published { members: 2 }))));

    // Both replicas agree on the membership, so the next round writes nothing
    tokio::time::sleep(Duration::from_secs(10)).await;
    for instance in &instances {
        assert_eq!(
            instance.controller().last_outcome(),
            Some(Ok(ReconcileOutcome::Unchanged))
        );
    }

    for instance in &instances {
        assert!(instance.pre_shutdown().await);
        assert_eq!(instance.controller().state(), ControllerState::Stopped);
    }
    running.shutdown();
}

#[test]
fn test_bad_replica_configuration_is_reported() {
    let (cli, config) = shipped_config(&["--reconciler", "dns", "--replica", "10.0.0.2"]);
    let err = build_instances(&config, &cli.replicas).unwrap_err();
    assert!(format!("{:#}", err).contains("reconciler not implemented: dns"));
}
