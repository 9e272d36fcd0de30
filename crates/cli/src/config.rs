//! Command line surface and host configuration.
//!
//! Settings come from three layers, later ones winning:
//! 1. Built-in defaults
//! 2. An optional JSON config file (`--config`)
//! 3. Flags and their environment variables (`DUALCALL_LOG`, `DUALCALL_FORMAT`)

use crate::commands::Command;
use crate::logging;
use anyhow::Context;
use clap::Parser;
use corelib::codec::Format;
use dispatch::DispatchConfig;
use events::EventConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Parser, Debug)]
#[command(name = "dualcall", version, about = "Dual-format object graph calls")]
pub struct CliConfig {
    /// JSON config file.
    #[arg(long, short, env = "DUALCALL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter directive, used when RUST_LOG is unset.
    #[arg(long, env = "DUALCALL_LOG")]
    pub log: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,

    /// Wire format for demo calls.
    #[arg(long, env = "DUALCALL_FORMAT")]
    pub format: Option<Format>,

    #[command(subcommand)]
    pub command: Command,
}

/// Everything the host needs after layering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub log: String,
    pub json_logs: bool,
    pub format: Format,
    pub dispatch: DispatchConfig,
    pub events: EventConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            log: DEFAULT_LOG_FILTER.to_string(),
            json_logs: false,
            format: Format::default(),
            dispatch: DispatchConfig::default(),
            events: EventConfig::default(),
        }
    }
}

impl HostConfig {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).context("invalid host config")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("in {}", path.display()))
    }
}

impl CliConfig {
    /// Layer the config file and flags over the defaults.
    pub fn host_config(&self) -> anyhow::Result<HostConfig> {
        let mut host = match &self.config {
            Some(path) => HostConfig::load(path)?,
            None => HostConfig::default(),
        };
        if let Some(log) = &self.log {
            host.log = log.clone();
        }
        if self.json_logs {
            host.json_logs = true;
        }
        if let Some(format) = self.format {
            host.format = format;
        }
        Ok(host)
    }

    pub fn run(self) -> anyhow::Result<()> {
        let host = self.host_config()?;
        logging::init(&host.log, host.json_logs)?;
        debug!(?host, "configuration loaded");

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("starting runtime")?;
        let lines = runtime.block_on(self.command.execute(&host))?;
        for line in lines {
            println!("{}", line);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliConfig {
        CliConfig::try_parse_from(std::iter::once("dualcall").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let host = HostConfig::from_json(
            r#"{"format": "named", "events": {"drain_timeout_ms": 0}}"#,
        )
        .unwrap();
        assert_eq!(host.format, Format::Named);
        assert_eq!(host.events.drain_timeout(), None);
        assert_eq!(host.log, DEFAULT_LOG_FILTER);
        assert_eq!(host.dispatch, DispatchConfig::default());
    }

    #[test]
    fn test_unknown_format_rejected() {
        assert!(HostConfig::from_json(r#"{"format": "xml"}"#).is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = parse(&["--log", "debug", "--format", "named", "--json-logs", "route"]);
        let host = cli.host_config().unwrap();
        assert_eq!(host.log, "debug");
        assert_eq!(host.format, Format::Named);
        assert!(host.json_logs);
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("dualcall-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"dispatch": {"expose_fault_details": false}}"#).unwrap();
        let host = HostConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(!host.dispatch.expose_fault_details);
        assert_eq!(host.dispatch.fault_message, "operation failed");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let error = HostConfig::load(Path::new("/nonexistent/dualcall.json")).unwrap_err();
        assert!(format!("{:#}", error).contains("reading config file"));
    }
}
