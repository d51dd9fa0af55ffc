use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};

use crate::matcher::{self, MatchedUrl};
use crate::output::OutputCapture;
use crate::supervisor::Supervisor;
use crate::types::TunnelDef;

pub(crate) fn render_command(template: &str, port: u16) -> String {
	template.replace("{port}", &port.to_string())
}

/// Owns one tunnel process end-to-end: spawn, line loop, shutdown.
pub(crate) async fn run_tunnel(
	supervisor: Arc<Supervisor>,
	index: usize,
	def: TunnelDef,
	port: u16,
	output: OutputCapture,
	grace: Duration,
	mut cancel: watch::Receiver<bool>,
) {
	let command = render_command(&def.command, port);

	let mut child = match spawn_tunnel(&command) {
		Ok(c) => c,
		Err(e) => {
			tracing::error!("{}: failed to spawn `{}`: {}", def.name, command, e);
			supervisor
				.mark_done(index, Some(format!("spawn failed: {}", e)))
				.await;
			return;
		}
	};

	let pid = child.id().unwrap_or(0);
	supervisor.mark_running(index, pid).await;
	tracing::info!("{}: tunnel process started (pid {})", def.name, pid);

	// Merge stdout and stderr into one line stream. The channel closes
	// once both pipes hit EOF.
	let (line_tx, mut line_rx) = mpsc::channel::<String>(64);
	if let Some(stdout) = child.stdout.take() {
		let tx = line_tx.clone();
		tokio::spawn(async move {
			pipe_lines(stdout, tx).await;
		});
	}
	if let Some(stderr) = child.stderr.take() {
		let tx = line_tx.clone();
		tokio::spawn(async move {
			pipe_lines(stderr, tx).await;
		});
	}
	drop(line_tx);

	let mut matched = false;
	loop {
		tokio::select! {
			line = line_rx.recv() => match line {
				Some(line) => {
					output.push_line(&line).await;
					if let Some(m) = matcher::match_line(&def.pattern, &line) {
						if !matched {
							matched = true;
							tracing::info!("{}: matched url {}", def.name, m.url);
							supervisor.record_match(index, m.url.clone()).await;
						}
						invoke_match_callback(&def, &m);
					}
				}
				None => break,
			},
			_ = cancel.changed() => {
				shutdown_child(&mut child, pid, &def.name, grace).await;
				supervisor.mark_done(index, None).await;
				return;
			}
		}
	}

	// Output closed on its own; reap the child, or shut it down if it is
	// still alive with closed pipes.
	let status = tokio::select! {
		status = child.wait() => status,
		_ = cancel.changed() => {
			shutdown_child(&mut child, pid, &def.name, grace).await;
			supervisor.mark_done(index, None).await;
			return;
		}
	};

	if *cancel.borrow() {
		supervisor.mark_done(index, None).await;
		return;
	}

	match status {
		Ok(s) if s.success() => {
			tracing::debug!("{}: tunnel process exited cleanly", def.name);
			supervisor.mark_done(index, None).await;
		}
		Ok(s) => {
			let code = s.code().unwrap_or(-1);
			tracing::warn!(
				"{}: tunnel process exited unexpectedly (exit {})",
				def.name,
				code
			);
			supervisor
				.mark_done(index, Some(format!("exited with status {}", code)))
				.await;
		}
		Err(e) => {
			tracing::warn!("{}: failed to reap tunnel process: {}", def.name, e);
			supervisor
				.mark_done(index, Some(format!("wait failed: {}", e)))
				.await;
		}
	}
}

fn spawn_tunnel(command: &str) -> std::io::Result<Child> {
	let mut cmd = Command::new("sh");
	cmd.args(["-c", command])
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.process_group(0);
	cmd.spawn()
}

async fn pipe_lines<R: AsyncRead + Unpin>(reader: R, lines: mpsc::Sender<String>) {
	let mut reader = BufReader::new(reader).lines();
	while let Ok(Some(line)) = reader.next_line().await {
		if lines.send(line).await.is_err() {
			break;
		}
	}
}

fn invoke_match_callback(def: &TunnelDef, m: &MatchedUrl) {
	if let Some(ref callback) = def.on_match {
		let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
			callback(&m.url, m.note.as_deref())
		}));
		if result.is_err() {
			tracing::warn!("{}: match callback panicked", def.name);
		}
	}
}

/// SIGINT the process group, escalate to SIGKILL after the grace period.
/// A no-op when the process already exited.
async fn shutdown_child(child: &mut Child, pid: u32, name: &str, grace: Duration) {
	if let Ok(Some(_)) = child.try_wait() {
		return;
	}

	signal_group(pid, nix::sys::signal::Signal::SIGINT);

	match tokio::time::timeout(grace, child.wait()).await {
		Ok(_) => {
			tracing::debug!("{}: tunnel process stopped", name);
		}
		Err(_) => {
			tracing::warn!(
				"{}: graceful stop timed out after {:?}, killing",
				name,
				grace
			);
			signal_group(pid, nix::sys::signal::Signal::SIGKILL);
			let _ = child.kill().await;
			let _ = child.wait().await;
		}
	}
}

fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
	use nix::sys::signal::killpg;
	use nix::unistd::Pid;
	if pid == 0 {
		return;
	}
	let _ = killpg(Pid::from_raw(pid as i32), signal);
}
