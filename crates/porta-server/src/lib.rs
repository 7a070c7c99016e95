//! Porta server library
//!
//! Command line and file settings, logging, and signal handling for the
//! `porta-server` binary. The reconciliation machinery lives in `porta-core`.

use std::net::IpAddr;

use anyhow::Context;
use porta_core::{Config, Instance};

pub mod settings;
pub mod startup;

/// One instance per address: the configured public address first, then
/// each replica address, all sharing the stores connected for the first.
pub fn build_instances(base: &Config, replicas: &[IpAddr]) -> anyhow::Result<Vec<Instance>> {
    let primary = base.complete().context("invalid configuration")?;
    let stores = primary
        .connect_stores()
        .context("failed to connect to the store")?;

    let mut instances = vec![Instance::new(primary, stores.as_ref())?];
    for address in replicas {
        let config = Config {
            public_address: Some(*address),
            ..base.clone()
        };
        let instance = Instance::from_config(&config, stores.as_ref())
            .with_context(|| format!("invalid configuration for replica {}", address))?;
        instances.push(instance);
    }
    Ok(instances)
}
