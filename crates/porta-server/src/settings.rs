//! Layered settings for the server binary.
//!
//! Sources, lowest precedence first:
//! 1. the YAML file named by `--config` (optional)
//! 2. `PORTA__*` environment variables, `__` separating key segments
//!    (`PORTA__ENDPOINT__RECONCILER__TYPE=none`)
//! 3. command line flags

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use config::{Config, ConfigBuilder, Environment, File, builder::DefaultState};
use porta_core::config::settings as keys;

pub const DEFAULT_CONFIG_FILE: &str = "conf/porta.yml";
const ENV_PREFIX: &str = "PORTA";
const ENV_SEPARATOR: &str = "__";

/// Command line arguments for the server
#[derive(Debug, Parser)]
#[command(name = "porta-server", version, about)]
pub struct Cli {
    /// Settings file; missing files are skipped
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    pub config_file: PathBuf,
    /// Endpoint reconciler: lease, master-count or none
    #[arg(short = 'r', long = "reconciler")]
    pub reconciler: Option<String>,
    #[arg(long = "master-count")]
    pub master_count: Option<i64>,
    #[arg(long = "public-address")]
    pub public_address: Option<IpAddr>,
    #[arg(long = "public-port")]
    pub public_port: Option<u16>,
    /// Store endpoints, comma separated
    #[arg(long = "store", env = "PORTA_STORE")]
    pub store: Option<String>,
    /// Extra replica addresses to run in this process alongside the
    /// public address, all sharing one store
    #[arg(long = "replica", value_name = "ADDRESS")]
    pub replicas: Vec<IpAddr>,
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .keep_prefix(true)
        .try_parsing(true)
}

/// Build the layered settings for `cli`
pub fn load(cli: &Cli) -> anyhow::Result<Config> {
    layered(cli, environment())
}

fn layered(cli: &Cli, env: Environment) -> anyhow::Result<Config> {
    let builder = Config::builder()
        .add_source(File::from(cli.config_file.as_path()).required(false))
        .add_source(env);

    overrides(builder, cli)?
        .build()
        .with_context(|| format!("failed to load settings from {}", cli.config_file.display()))
}

fn overrides(
    mut builder: ConfigBuilder<DefaultState>,
    cli: &Cli,
) -> anyhow::Result<ConfigBuilder<DefaultState>> {
    if let Some(v) = &cli.reconciler {
        builder = builder.set_override(keys::RECONCILER_TYPE, v.as_str())?;
    }
    if let Some(v) = cli.master_count {
        builder = builder.set_override(keys::RECONCILER_MASTER_COUNT, v)?;
    }
    if let Some(v) = cli.public_address {
        builder = builder.set_override(keys::PUBLIC_ADDRESS, v.to_string())?;
    }
    if let Some(v) = cli.public_port {
        builder = builder.set_override(keys::PUBLIC_PORT, i64::from(v))?;
    }
    if let Some(v) = &cli.store {
        builder = builder.set_override(keys::STORE_ENDPOINTS, v.as_str())?;
    }
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;
    use std::time::Duration;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(vars))
    }

    fn settings_file(yaml: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("porta-server").chain(args.iter().copied()))
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let cli = cli(&["--config", "/nonexistent/porta.yml"]);
        let settings = layered(&cli, env(&[])).unwrap();
        let config = porta_core::Config::from_settings(&settings).unwrap();
        assert_eq!(config, porta_core::Config::default());
    }

    #[test]
    fn test_environment_overrides_file_and_flags_override_both() {
        let file = settings_file(
            r#"
porta:
  endpoint:
    reconciler:
      type: lease
      interval: 10s
  public:
    address: 10.0.0.1
"#,
        );
        let path = file.path().to_str().unwrap();

        let from_file = layered(&cli(&["--config", path]), env(&[])).unwrap();
        let config = porta_core::Config::from_settings(&from_file).unwrap();
        assert_eq!(config.endpoint_reconciler_type.as_deref(), Some("lease"));

        let with_env = layered(
            &cli(&["--config", path]),
            env(&[
                ("PORTA__ENDPOINT__RECONCILER__TYPE", "none"),
                ("PORTA__ENDPOINT__RECONCILER__INTERVAL", "3s"),
            ]),
        )
        .unwrap();
        let config = porta_core::Config::from_settings(&with_env).unwrap();
        assert_eq!(config.endpoint_reconciler_type.as_deref(), Some("none"));
        assert_eq!(config.endpoint_reconciler_interval, Some(Duration::from_secs(3)));

        let with_flags = layered(
            &cli(&[
                "--config",
                path,
                "--reconciler",
                "master-count",
                "--master-count",
                "2",
                "--public-address",
                "10.0.0.7",
            ]),
            env(&[("PORTA__ENDPOINT__RECONCILER__TYPE", "none")]),
        )
        .unwrap();
        let config = porta_core::Config::from_settings(&with_flags).unwrap();
        assert_eq!(config.endpoint_reconciler_type.as_deref(), Some("master-count"));
        assert_eq!(config.master_count, Some(2));
        assert_eq!(config.public_address, Some("10.0.0.7".parse().unwrap()));
    }

    #[test]
    fn test_underscored_environment_keys() {
        let settings = layered(
            &cli(&["--config", "/nonexistent/porta.yml"]),
            env(&[("PORTA__ENDPOINT__RECONCILER__MASTER_COUNT", "3")]),
        )
        .unwrap();
        let config = porta_core::Config::from_settings(&settings).unwrap();
        assert_eq!(config.master_count, Some(3));
    }

    #[test]
    fn test_store_flag_accepts_comma_list() {
        let settings = layered(
            &cli(&["--config", "/nonexistent/porta.yml", "--store", "memory://a, memory://b"]),
            env(&[]),
        )
        .unwrap();
        let config = porta_core::Config::from_settings(&settings).unwrap();
        assert_eq!(
            config.store.unwrap().endpoints,
            vec!["memory://a".to_string(), "memory://b".to_string()]
        );
    }

    #[test]
    fn test_replica_flags() {
        let cli = cli(&["--replica", "10.0.0.2", "--replica", "10.0.0.3"]);
        assert_eq!(cli.config_file, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert_eq!(
            cli.replicas,
            vec![
                "10.0.0.2".parse::<IpAddr>().unwrap(),
                "10.0.0.3".parse::<IpAddr>().unwrap()
            ]
        );
    }
}
