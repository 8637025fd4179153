//! Command line and environment configuration

use anyhow::{Context, Result};
use clap::Parser;
use happy_session::{expand_home, CommandSpec, RegistryConfig, StateStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "happy-server")]
#[command(author, version, about = "Persistent, shareable terminal sessions over WebSocket", long_about = None)]
pub struct ServerArgs {
    /// Address to listen on
    #[arg(long, env = "HAPPY_BIND", default_value = "127.0.0.1:16790")]
    pub bind: SocketAddr,

    /// State directory (defaults to ~/.happy)
    #[arg(long, env = "HAPPY_HOME")]
    pub home: Option<PathBuf>,

    /// Program spawned for each session
    #[arg(long, env = "HAPPY_COMMAND", default_value = "claude")]
    pub command: String,

    /// Extra arguments for every spawn
    #[arg(long = "arg", env = "HAPPY_ARGS", value_delimiter = ' ', allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Arguments appended when resuming a saved session
    #[arg(
        long = "continue-arg",
        env = "HAPPY_CONTINUE_ARGS",
        value_delimiter = ' ',
        allow_hyphen_values = true,
        default_value = "--continue"
    )]
    pub continue_args: Vec<String>,

    /// Seconds a session outlives its last client
    #[arg(long, env = "HAPPY_GRACE_SECS", default_value_t = 30)]
    pub grace_secs: u64,

    /// Seconds between periodic snapshot flushes
    #[arg(long, env = "HAPPY_FLUSH_SECS", default_value_t = 30)]
    pub flush_secs: u64,

    /// Working directory for new sessions that do not name one
    #[arg(long, env = "HAPPY_DEFAULT_CWD")]
    pub default_cwd: Option<String>,

    /// Write logs to <dir>/server.log instead of stderr
    #[arg(long, env = "HAPPY_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl ServerArgs {
    /// State directory: `--home`, `$HAPPY_HOME`, or `~/.happy`
    pub fn happy_home(&self) -> Result<PathBuf> {
        if let Some(home) = &self.home {
            return Ok(home.clone());
        }
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(home.join(".happy"))
    }

    pub fn state_store(&self) -> Result<StateStore> {
        Ok(StateStore::in_dir(&self.happy_home()?))
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_secs.max(1))
    }

    pub fn registry_config(&self) -> RegistryConfig {
        let defaults = RegistryConfig::default();
        RegistryConfig {
            command: CommandSpec {
                program: self.command.clone(),
                args: self.args.clone(),
                continue_args: self.continue_args.clone(),
                ..CommandSpec::default()
            },
            grace_period: Duration::from_secs(self.grace_secs),
            default_cwd: self
                .default_cwd
                .as_deref()
                .map(expand_home)
                .unwrap_or(defaults.default_cwd.clone()),
            ..defaults
        }
    }

    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "happy_server=debug,happy_session=debug,tower_http=debug"
        } else {
            "happy_server=info,happy_session=info"
        }
    }
}
