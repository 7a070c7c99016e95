//! File-based logging for the Porta server.
//!
//! Besides the console, events are written to rolling files, one per
//! component plus a root file that receives everything:
//!
//! | Log File        | Component                          | Target Prefixes                               |
//! |-----------------|------------------------------------|-----------------------------------------------|
//! | porta.log       | Root logger (all components)       | (all)                                         |
//! | reconciler.log  | Reconcilers and the tick loop      | porta_core::reconciler, porta_core::controller |
//! | store.log       | Lease and endpoints stores         | porta_core::store                             |
//!
//! Log files are stored in `~/porta/logs` by default.
//! Override with the `PORTA_LOG_DIR` environment variable.

use std::path::PathBuf;

use anyhow::Context;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

const ROOT_LOG_FILE: &str = "porta.log";

struct ComponentLogDef {
    file_name: &'static str,
    targets: &'static [&'static str],
}

const COMPONENT_LOGS: &[ComponentLogDef] = &[
    ComponentLogDef {
        file_name: "reconciler.log",
        targets: &["porta_core::reconciler", "porta_core::controller"],
    },
    ComponentLogDef {
        file_name: "store.log",
        targets: &["porta_core::store"],
    },
];

/// Log rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    /// Rotate daily (default)
    Daily,
    /// Rotate hourly
    Hourly,
    /// Never rotate (single file)
    Never,
}

impl LogRotation {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "daily" => Some(Self::Daily),
            "hourly" => Some(Self::Hourly),
            "never" => Some(Self::Never),
            _ => None,
        }
    }
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Logging configuration for the server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Base log directory (default: `~/porta/logs`)
    pub log_dir: PathBuf,
    pub console_output: bool,
    pub console_level: Level,
    pub file_logging: bool,
    pub file_level: Level,
    pub rotation: LogRotation,
}

fn default_log_dir(home: Option<String>) -> PathBuf {
    let home = home.unwrap_or_else(|| "/tmp".to_string());
    PathBuf::from(format!("{}/porta/logs", home))
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(std::env::var("HOME").ok()),
            console_output: true,
            console_level: Level::INFO,
            file_logging: true,
            file_level: Level::INFO,
            rotation: LogRotation::Daily,
        }
    }
}

impl LoggingConfig {
    /// Create from `PORTA_LOG_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create from an arbitrary variable source; unset or unparsable values
    /// fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let log_dir = lookup("PORTA_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_log_dir(lookup("HOME")));

        let console_output = lookup("PORTA_LOG_CONSOLE")
            .map(|v| v.to_lowercase() != "false" && v != "0")
            .unwrap_or(true);

        let file_logging = lookup("PORTA_LOG_FILE")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(true);

        let console_level = lookup("PORTA_LOG_LEVEL")
            .and_then(|v| v.parse().ok())
            .unwrap_or(Level::INFO);

        let file_level = lookup("PORTA_LOG_FILE_LEVEL")
            .and_then(|v| v.parse().ok())
            .unwrap_or(console_level);

        let rotation = lookup("PORTA_LOG_ROTATION")
            .and_then(|v| LogRotation::parse(&v))
            .unwrap_or(LogRotation::Daily);

        Self {
            log_dir,
            console_output,
            console_level,
            file_logging,
            file_level,
            rotation,
        }
    }
}

/// Keeps the non-blocking file writers alive. Dropping it flushes buffered
/// output, so hold it until `main` returns.
pub struct LoggingGuard {
    _file_guards: Vec<WorkerGuard>,
}

fn file_layer(
    config: &LoggingConfig,
    file_name: &str,
    guards: &mut Vec<WorkerGuard>,
) -> impl Layer<Registry> + Send + Sync + use<> {
    let appender = RollingFileAppender::new(config.rotation.into(), &config.log_dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    guards.push(guard);

    fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_names(true)
        .with_ansi(false)
}

/// Initialize the global subscriber with console and file output.
///
/// `RUST_LOG` overrides the configured level for the console and the root
/// file. Component files take every event from their targets.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    if config.file_logging {
        std::fs::create_dir_all(&config.log_dir).with_context(|| {
            format!("failed to create log directory {}", config.log_dir.display())
        })?;
    }

    let mut guards: Vec<WorkerGuard> = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console_output {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.console_level.to_string()));
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_filter(filter);
        layers.push(Box::new(console_layer));
    }

    if config.file_logging {
        let root_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.file_level.to_string()));
        layers.push(Box::new(
            file_layer(config, ROOT_LOG_FILE, &mut guards).with_filter(root_filter),
        ));

        for component in COMPONENT_LOGS {
            let mut targets = Targets::new();
            for target in component.targets {
                targets = targets.with_target(*target, LevelFilter::TRACE);
            }
            layers.push(Box::new(
                file_layer(config, component.file_name, &mut guards).with_filter(targets),
            ));
        }
    }

    Registry::default()
        .with(layers)
        .try_init()
        .context("failed to initialize logging")?;

    if config.file_logging {
        tracing::info!(
            log_dir = %config.log_dir.display(),
            "File logging initialized: {} (root) + {} component log files",
            ROOT_LOG_FILE,
            COMPONENT_LOGS.len()
        );
    }

    Ok(LoggingGuard {
        _file_guards: guards,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = LoggingConfig::from_lookup(lookup(&[("HOME", "/home/porta")]));
        assert_eq!(config.log_dir, PathBuf::from("/home/porta/porta/logs"));
        assert!(config.console_output);
        assert!(config.file_logging);
        assert_eq!(config.console_level, Level::INFO);
        assert_eq!(config.file_level, Level::INFO);
        assert_eq!(config.rotation, LogRotation::Daily);
    }

    #[test]
    fn test_missing_home_falls_back_to_tmp() {
        let config = LoggingConfig::from_lookup(lookup(&[]));
        assert_eq!(config.log_dir, PathBuf::from("/tmp/porta/logs"));
    }

    #[test]
    fn test_overrides() {
        let config = LoggingConfig::from_lookup(lookup(&[
            ("PORTA_LOG_DIR", "/var/log/porta"),
            ("PORTA_LOG_CONSOLE", "0"),
            ("PORTA_LOG_FILE", "false"),
            ("PORTA_LOG_LEVEL", "debug"),
            ("PORTA_LOG_ROTATION", "Hourly"),
        ]));
        assert_eq!(config.log_dir, PathBuf::from("/var/log/porta"));
        assert!(!config.console_output);
        assert!(!config.file_logging);
        assert_eq!(config.console_level, Level::DEBUG);
        // File level follows the console level unless set
        assert_eq!(config.file_level, Level::DEBUG);
        assert_eq!(config.rotation, LogRotation::Hourly);
    }

    #[test]
    fn test_bad_values_are_ignored() {
        let config = LoggingConfig::from_lookup(lookup(&[
            ("PORTA_LOG_LEVEL", "loud"),
            ("PORTA_LOG_FILE_LEVEL", "warn"),
            ("PORTA_LOG_ROTATION", "weekly"),
        ]));
        assert_eq!(config.console_level, Level::INFO);
        assert_eq!(config.file_level, Level::WARN);
        assert_eq!(config.rotation, LogRotation::Daily);
    }

    #[test]
    fn test_component_targets_are_core_modules() {
        for component in COMPONENT_LOGS {
            assert!(component.file_name.ends_with(".log"));
            assert_ne!(component.file_name, ROOT_LOG_FILE);
            assert!(component.targets.iter().all(|t| t.starts_with("porta_core::")));
        }
    }
}
