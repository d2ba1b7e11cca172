//! Configuration for Cachewarden.
//!
//! Everything comes from command line flags, each of which can also be set through a
//! `CACHEWARDEN_*` environment variable. The server list itself lives in a YAML file.

use std::path::PathBuf;
use std::time::Duration;

use clap::builder::NonEmptyStringValueParser;
use clap::{Parser, ValueEnum};

use crate::session::Timeouts;
use crate::wait::WaitPolicy;
use crate::wire::DEFAULT_READY_MARKER;

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Config {
    /// Serve (HTTP API + scheduled checks), Check (one fleet pass), or Status (probe only)
    #[arg(value_enum, default_value = "serve")]
    pub mode: Mode,

    /// Servers file to use: a YAML list of URLs or {url, name} mappings
    #[arg(long, env = "CACHEWARDEN_SERVERS_FILE", default_value = "servers.yaml")]
    pub servers_file: PathBuf,

    /// Extra server URL, appended after the servers file. Repeatable.
    #[arg(long = "server", env = "CACHEWARDEN_SERVERS", value_delimiter = ',')]
    pub servers: Vec<String>,

    /// Workflow JSON submitted to servers whose cache is missing
    #[arg(long, env = "CACHEWARDEN_WORKFLOW", default_value = "workflow.json")]
    pub workflow: PathBuf,

    /// Minutes between scheduled fleet passes
    #[arg(long, env = "CACHEWARDEN_INTERVAL_MINUTES", default_value_t = 30,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub interval_minutes: u64,

    /// Timeout of a readiness check, queue poll or history fetch
    #[arg(long, env = "CACHEWARDEN_PROBE_TIMEOUT_SECS", default_value_t = 10,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub probe_timeout_secs: u64,

    /// Timeout of a workflow submission
    #[arg(long, env = "CACHEWARDEN_SUBMIT_TIMEOUT_SECS", default_value_t = 30,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub submit_timeout_secs: u64,

    /// How long to wait for a submitted workflow to finish
    #[arg(long, env = "CACHEWARDEN_WAIT_DEADLINE_SECS", default_value_t = 120,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub wait_deadline_secs: u64,

    /// Seconds between queue polls while waiting
    #[arg(long, env = "CACHEWARDEN_POLL_INTERVAL_SECS", default_value_t = 2,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval_secs: u64,

    /// Text the readiness endpoint returns once the cache is loaded
    #[arg(long, env = "CACHEWARDEN_READY_MARKER", default_value = DEFAULT_READY_MARKER,
          value_parser = NonEmptyStringValueParser::new())]
    pub ready_marker: String,

    /// (Serve mode) Address to listen on
    #[arg(long, env = "CACHEWARDEN_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// (Serve mode) Port to listen on
    #[arg(long, env = "CACHEWARDEN_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Also append logs to this file
    #[arg(long, env = "CACHEWARDEN_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

impl Config {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            probe: Duration::from_secs(self.probe_timeout_secs),
            submit: Duration::from_secs(self.submit_timeout_secs),
        }
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            deadline: Duration::from_secs(self.wait_deadline_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            ..WaitPolicy::default()
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, PartialEq, Clone, ValueEnum)]
pub enum Mode {
    Serve,
    Check,
    Status,
}
