use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Called on every line that matches a tunnel's pattern: `(url, note)`.
pub type MatchCallback = Arc<dyn Fn(&str, Option<&str>) + Send + Sync>;

/// Called once per session with the full report, in registration order.
pub type ReadyCallback = Arc<dyn Fn(&[TunnelReport]) + Send + Sync>;

/// Registration input for one tunnel.
///
/// `command` may contain the literal `{port}` placeholder; a command with
/// no placeholder is legal. `pattern` is a regex source: capture group 1
/// (or the whole match when the pattern has no groups) is the URL, capture
/// group 2 is an optional free-form note.
#[derive(Clone)]
pub struct TunnelSpec {
	pub command: String,
	pub pattern: String,
	pub name: String,
	pub on_match: Option<MatchCallback>,
}

impl TunnelSpec {
	pub fn new(
		command: impl Into<String>,
		pattern: impl Into<String>,
		name: impl Into<String>,
	) -> Self {
		Self {
			command: command.into(),
			pattern: pattern.into(),
			name: name.into(),
			on_match: None,
		}
	}

	pub fn with_match_callback(mut self, callback: MatchCallback) -> Self {
		self.on_match = Some(callback);
		self
	}
}

/// A validated, immutable tunnel definition. Names are unique within a
/// supervisor; colliding registrations get `name_2`, `name_3`, …
#[derive(Clone)]
pub struct TunnelDef {
	pub name: String,
	pub command: String,
	pub pattern: Regex,
	pub on_match: Option<MatchCallback>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
	Idle,
	Starting,
	Running,
	Stopping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TunnelState {
	Pending,
	Running { pid: u32 },
	Done,
	Failed { reason: String },
}

impl TunnelState {
	pub fn is_running(&self) -> bool {
		matches!(self, TunnelState::Running { .. })
	}

	pub fn is_done(&self) -> bool {
		matches!(self, TunnelState::Done | TunnelState::Failed { .. })
	}
}

/// Live snapshot of one tunnel's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelStatus {
	pub name: String,
	pub state: TunnelState,
	pub url: Option<String>,
}

/// One element of the aggregate report. `url` is `None` for tunnels that
/// never produced a matching line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelReport {
	pub name: String,
	pub url: Option<String>,
}

pub struct SupervisorConfig {
	/// Where per-tunnel `tunnel_<name>.log` files go. `None` disables file capture.
	pub log_dir: Option<PathBuf>,
	/// How long a child gets between SIGINT and SIGKILL on stop.
	pub stop_grace: Duration,
	/// Aggregate callback, invoked at most once per session.
	pub on_ready: Option<ReadyCallback>,
}

impl Default for SupervisorConfig {
	fn default() -> Self {
		Self {
			log_dir: None,
			stop_grace: Duration::from_secs(5),
			on_ready: None,
		}
	}
}

#[derive(Debug, Clone, Copy)]
pub struct StartOptions {
	/// Hold the aggregate report until the local port accepts connections.
	/// Processes are launched immediately either way.
	pub check_local_port: bool,
	/// Budget for the port wait and the URL wait combined.
	pub wait_timeout: Duration,
	/// Poll interval for the port and report checks.
	pub check_interval: Duration,
}

impl Default for StartOptions {
	fn default() -> Self {
		Self {
			check_local_port: true,
			wait_timeout: Duration::from_secs(60),
			check_interval: Duration::from_secs(1),
		}
	}
}
