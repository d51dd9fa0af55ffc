use std::future::Future;
use std::sync::Arc;

use regex::Regex;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::output::OutputCapture;
use crate::probe;
use crate::runner;
use crate::types::*;

/// Supervises one session of tunnel processes for a local port.
///
/// Register tunnels while idle, `start` them all concurrently, collect
/// matched URLs into a registration-ordered report, `stop` everything
/// deterministically. One session is active at a time.
pub struct Supervisor {
	port: u16,
	config: SupervisorConfig,
	tunnels: RwLock<Vec<TunnelDef>>,
	session: RwLock<Option<Session>>,
	phase: RwLock<SessionPhase>,
	report: watch::Sender<Option<Vec<TunnelReport>>>,
}

struct Session {
	slots: Vec<Slot>,
	stop: watch::Sender<bool>,
	started_at: tokio::time::Instant,
	jobs: Vec<JoinHandle<()>>,
	ready_job: Option<JoinHandle<()>>,
}

/// Per-tunnel runtime state. Mutated only by that tunnel's runner task,
/// through the supervisor's `mark_*` helpers.
struct Slot {
	name: String,
	output: OutputCapture,
	pid: Option<u32>,
	matched_url: Option<String>,
	done: bool,
	error: Option<String>,
}

impl Slot {
	fn reported(&self) -> bool {
		self.done || self.matched_url.is_some()
	}

	fn state(&self) -> TunnelState {
		if self.done {
			match self.error {
				Some(ref reason) => TunnelState::Failed {
					reason: reason.clone(),
				},
				None => TunnelState::Done,
			}
		} else {
			match self.pid {
				Some(pid) => TunnelState::Running { pid },
				None => TunnelState::Pending,
			}
		}
	}
}

impl Supervisor {
	pub fn new(port: u16, config: SupervisorConfig) -> Arc<Self> {
		let (report, _) = watch::channel(None);
		Arc::new(Self {
			port,
			config,
			tunnels: RwLock::new(Vec::new()),
			session: RwLock::new(None),
			phase: RwLock::new(SessionPhase::Idle),
			report,
		})
	}

	/// Construct and register a pre-defined tunnel list in one step.
	pub async fn with_tunnels(
		port: u16,
		config: SupervisorConfig,
		specs: Vec<TunnelSpec>,
	) -> Result<Arc<Self>, Error> {
		if specs.is_empty() {
			return Err(Error::Config("tunnel list must not be empty".into()));
		}
		let sup = Self::new(port, config);
		sup.register_tunnels(specs).await?;
		Ok(sup)
	}

	pub fn port(&self) -> u16 {
		self.port
	}

	pub async fn phase(&self) -> SessionPhase {
		*self.phase.read().await
	}

	/// Register one tunnel. Returns the final name, which is auto-suffixed
	/// (`name_2`, `name_3`, …) when the requested name is taken.
	pub async fn register_tunnel(&self, spec: TunnelSpec) -> Result<String, Error> {
		{
			let phase = self.phase.read().await;
			if *phase != SessionPhase::Idle {
				return Err(Error::Config(
					"cannot register tunnels while a session is active".into(),
				));
			}
		}

		if spec.command.trim().is_empty() {
			return Err(Error::Config("tunnel command must not be empty".into()));
		}
		if spec.name.trim().is_empty() {
			return Err(Error::Config("tunnel name must not be empty".into()));
		}
		let pattern = Regex::new(&spec.pattern)?;

		let mut tunnels = self.tunnels.write().await;
		let name = unique_name(&tunnels, &spec.name);
		if name != spec.name {
			tracing::debug!("tunnel name {} taken, registering as {}", spec.name, name);
		}
		tunnels.push(TunnelDef {
			name: name.clone(),
			command: spec.command,
			pattern,
			on_match: spec.on_match,
		});
		Ok(name)
	}

	/// Register a batch, in order, through the single-registration path.
	pub async fn register_tunnels(&self, specs: Vec<TunnelSpec>) -> Result<Vec<String>, Error> {
		let mut names = Vec::with_capacity(specs.len());
		for spec in specs {
			names.push(self.register_tunnel(spec).await?);
		}
		Ok(names)
	}

	/// Launch every registered tunnel concurrently and return once launch
	/// is issued. The aggregate callback fires later, from a watcher task,
	/// once every tunnel has reported or `wait_timeout` elapses.
	///
	/// Calling this while a session is active logs a warning and does
	/// nothing.
	pub async fn start(self: &Arc<Self>, options: StartOptions) -> Result<(), Error> {
		{
			let mut phase = self.phase.write().await;
			if *phase != SessionPhase::Idle {
				tracing::warn!("start requested while session is {:?}, ignoring", *phase);
				return Ok(());
			}
			*phase = SessionPhase::Starting;
		}

		let tunnels: Vec<TunnelDef> = self.tunnels.read().await.clone();
		if tunnels.is_empty() {
			*self.phase.write().await = SessionPhase::Idle;
			return Err(Error::Config("no tunnels registered".into()));
		}

		tracing::info!(
			"starting {} tunnel(s) for port {}",
			tunnels.len(),
			self.port
		);
		self.report.send_replace(None);

		// Subscribe every cancel receiver before the session (and with it
		// the stop sender) becomes reachable, so a racing stop() is never
		// observed as already-seen.
		let (stop_tx, _) = watch::channel(false);
		let mut cancels = Vec::with_capacity(tunnels.len());
		for _ in 0..tunnels.len() {
			cancels.push(stop_tx.subscribe());
		}
		let ready_cancel = stop_tx.subscribe();

		let mut slots = Vec::with_capacity(tunnels.len());
		let mut outputs = Vec::with_capacity(tunnels.len());
		for def in &tunnels {
			let output = OutputCapture::new(self.config.log_dir.as_deref(), &def.name);
			outputs.push(output.clone());
			slots.push(Slot {
				name: def.name.clone(),
				output,
				pid: None,
				matched_url: None,
				done: false,
				error: None,
			});
		}

		// Install the session before spawning so runner updates always
		// land in a live slot.
		{
			let mut session = self.session.write().await;
			*session = Some(Session {
				slots,
				stop: stop_tx,
				started_at: tokio::time::Instant::now(),
				jobs: Vec::new(),
				ready_job: None,
			});
		}

		let mut jobs = Vec::with_capacity(tunnels.len());
		for (index, (def, cancel)) in tunnels.into_iter().zip(cancels).enumerate() {
			let sup = Arc::clone(self);
			let output = outputs[index].clone();
			let port = self.port;
			let grace = self.config.stop_grace;
			jobs.push(tokio::spawn(async move {
				runner::run_tunnel(sup, index, def, port, output, grace, cancel).await;
			}));
		}

		let ready_job = {
			let sup = Arc::clone(self);
			tokio::spawn(async move {
				sup.watch_ready(options, ready_cancel).await;
			})
		};

		{
			let mut session = self.session.write().await;
			if let Some(ref mut s) = *session {
				s.jobs = jobs;
				s.ready_job = Some(ready_job);
			}
		}

		*self.phase.write().await = SessionPhase::Running;
		Ok(())
	}

	/// Stop every tunnel and wait for clean exit. Safe to call repeatedly,
	/// concurrently, and without a running session.
	pub async fn stop(&self) {
		let session = {
			let mut phase = self.phase.write().await;
			match *phase {
				SessionPhase::Idle => {
					tracing::debug!("stop requested but no session is active");
					return;
				}
				SessionPhase::Stopping => {
					tracing::debug!("stop already in progress");
					return;
				}
				_ => {}
			}
			*phase = SessionPhase::Stopping;
			self.session.write().await.take()
		};

		let Some(session) = session else {
			*self.phase.write().await = SessionPhase::Idle;
			return;
		};

		tracing::info!("stopping tunnel session");
		let started_at = session.started_at;
		let _ = session.stop.send(true);

		for job in session.jobs {
			let _ = job.await;
		}
		if let Some(ready) = session.ready_job {
			let _ = ready.await;
		}

		*self.phase.write().await = SessionPhase::Idle;
		tracing::info!("tunnel session stopped after {:?}", started_at.elapsed());
	}

	/// Start, run `body`, and stop — also when the body panics. The
	/// recommended way to hold a session for a bounded piece of work.
	pub async fn scoped<F, Fut, T>(self: &Arc<Self>, options: StartOptions, body: F) -> Result<T, Error>
	where
		F: FnOnce(Arc<Supervisor>) -> Fut,
		Fut: Future<Output = T> + Send + 'static,
		T: Send + 'static,
	{
		self.start(options).await?;
		let result = tokio::spawn(body(Arc::clone(self))).await;
		self.stop().await;

		match result {
			Ok(value) => Ok(value),
			Err(e) => {
				if e.is_panic() {
					std::panic::resume_unwind(e.into_panic());
				}
				Err(Error::Session("session body was cancelled".into()))
			}
		}
	}

	/// Block until the aggregate report for the current session has been
	/// published, or `timeout` elapses.
	pub async fn wait_ready(&self, timeout: std::time::Duration) -> Option<Vec<TunnelReport>> {
		let mut rx = self.report.subscribe();
		let deadline = tokio::time::Instant::now() + timeout;

		loop {
			if let Some(report) = rx.borrow().clone() {
				return Some(report);
			}
			let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
			if remaining.is_zero() {
				return None;
			}
			match tokio::time::timeout(remaining, rx.changed()).await {
				Ok(Ok(())) => {}
				_ => return None,
			}
		}
	}

	/// Snapshot of every tunnel's state, registration order. Empty when no
	/// session is active.
	pub async fn status(&self) -> Vec<TunnelStatus> {
		let session = self.session.read().await;
		match *session {
			Some(ref s) => s
				.slots
				.iter()
				.map(|slot| TunnelStatus {
					name: slot.name.clone(),
					state: slot.state(),
					url: slot.matched_url.clone(),
				})
				.collect(),
			None => Vec::new(),
		}
	}

	/// URLs collected so far, registration order, matched tunnels only.
	pub async fn urls(&self) -> Vec<TunnelReport> {
		let session = self.session.read().await;
		match *session {
			Some(ref s) => s
				.slots
				.iter()
				.filter(|slot| slot.matched_url.is_some())
				.map(|slot| TunnelReport {
					name: slot.name.clone(),
					url: slot.matched_url.clone(),
				})
				.collect(),
			None => Vec::new(),
		}
	}

	/// Live output capture for one tunnel of the active session.
	pub async fn output(&self, name: &str) -> Option<OutputCapture> {
		let session = self.session.read().await;
		session
			.as_ref()?
			.slots
			.iter()
			.find(|slot| slot.name == name)
			.map(|slot| slot.output.clone())
	}

	async fn watch_ready(self: Arc<Self>, options: StartOptions, stop: watch::Receiver<bool>) {
		let deadline = tokio::time::Instant::now() + options.wait_timeout;

		if options.check_local_port {
			tracing::info!("waiting for port {} before reporting urls", self.port);
			let port = self.port;
			let stop_flag = stop.clone();
			let online = probe::wait_for_condition(
				move || {
					let stop_flag = stop_flag.clone();
					async move { *stop_flag.borrow() || probe::is_port_in_use(port).await }
				},
				options.check_interval,
				Some(options.wait_timeout),
			)
			.await;
			if !online {
				tracing::warn!("timed out waiting for port {}", self.port);
			}
		}

		let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
		let sup = Arc::clone(&self);
		let stop_flag = stop.clone();
		let all_reported = probe::wait_for_condition(
			move || {
				let sup = Arc::clone(&sup);
				let stop_flag = stop_flag.clone();
				async move { *stop_flag.borrow() || sup.all_reported().await }
			},
			options.check_interval,
			Some(remaining),
		)
		.await;
		if !all_reported {
			tracing::warn!("timed out waiting for tunnel urls, reporting what was collected");
		}

		if *stop.borrow() {
			return;
		}

		let report = self.collect_report().await;
		for entry in &report {
			match entry.url {
				Some(ref url) => tracing::info!("* Running on: {} ({})", url, entry.name),
				None => tracing::warn!("{}: no url reported", entry.name),
			}
		}

		if let Some(ref callback) = self.config.on_ready {
			let result =
				std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(&report)));
			if result.is_err() {
				tracing::warn!("ready callback panicked");
			}
		}

		self.report.send_replace(Some(report));
	}

	async fn all_reported(&self) -> bool {
		let session = self.session.read().await;
		match *session {
			Some(ref s) => s.slots.iter().all(|slot| slot.reported()),
			None => true,
		}
	}

	async fn collect_report(&self) -> Vec<TunnelReport> {
		let session = self.session.read().await;
		match *session {
			Some(ref s) => s
				.slots
				.iter()
				.map(|slot| TunnelReport {
					name: slot.name.clone(),
					url: slot.matched_url.clone(),
				})
				.collect(),
			None => Vec::new(),
		}
	}

	pub(crate) async fn mark_running(&self, index: usize, pid: u32) {
		let mut session = self.session.write().await;
		if let Some(ref mut s) = *session {
			if let Some(slot) = s.slots.get_mut(index) {
				slot.pid = Some(pid);
			}
		}
	}

	pub(crate) async fn record_match(&self, index: usize, url: String) {
		let mut session = self.session.write().await;
		if let Some(ref mut s) = *session {
			if let Some(slot) = s.slots.get_mut(index) {
				if slot.matched_url.is_none() {
					slot.matched_url = Some(url);
				}
			}
		}
	}

	pub(crate) async fn mark_done(&self, index: usize, error: Option<String>) {
		let mut session = self.session.write().await;
		if let Some(ref mut s) = *session {
			if let Some(slot) = s.slots.get_mut(index) {
				slot.done = true;
				if error.is_some() {
					slot.error = error;
				}
			}
		}
	}
}

fn unique_name(tunnels: &[TunnelDef], requested: &str) -> String {
	if !tunnels.iter().any(|t| t.name == requested) {
		return requested.to_string();
	}
	let mut n = 2;
	loop {
		let candidate = format!("{}_{}", requested, n);
		if !tunnels.iter().any(|t| t.name == candidate) {
			return candidate;
		}
		n += 1;
	}
}
