//! Registry configuration

use happy_types::TermSize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How long a session outlives its last client
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Delay before the redraw nudge on reconnect, so the client's resize lands first
pub const DEFAULT_REDRAW_DELAY: Duration = Duration::from_millis(300);

/// Program spawned for every session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Appended when resuming a saved session
    pub continue_args: Vec<String>,
    pub env_vars: Vec<(String, String)>,
}

impl Default for CommandSpec {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: Vec::new(),
            continue_args: vec!["--continue".to_string()],
            env_vars: vec![("TERM".to_string(), "xterm-256color".to_string())],
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub command: CommandSpec,
    pub grace_period: Duration,
    pub redraw_delay: Duration,
    /// Used when a client asks for a new session without a cwd
    pub default_cwd: PathBuf,
    pub initial_size: TermSize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            command: CommandSpec::default(),
            grace_period: DEFAULT_GRACE_PERIOD,
            redraw_delay: DEFAULT_REDRAW_DELAY,
            default_cwd: dirs::home_dir().unwrap_or_else(|| PathBuf::from("/")),
            initial_size: TermSize::default(),
        }
    }
}

/// Expand a leading `~` against the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    expand_home_with(path, dirs::home_dir().as_deref())
}

fn expand_home_with(path: &str, home: Option<&Path>) -> PathBuf {
    let Some(home) = home else {
        return PathBuf::from(path);
    };
    if path == "~" {
        return home.to_path_buf();
    }
    match path.strip_prefix("~/") {
        Some(rest) => home.join(rest),
        None => PathBuf::from(path),
    }
}
