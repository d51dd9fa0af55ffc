use std::future::Future;
use std::time::Duration;

use tokio::net::TcpStream;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Check whether something is accepting connections on `127.0.0.1:port`.
pub async fn is_port_in_use(port: u16) -> bool {
	let addr = format!("127.0.0.1:{}", port);
	matches!(
		tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr)).await,
		Ok(Ok(_))
	)
}

/// Poll `predicate` every `interval` until it holds or `timeout` elapses.
///
/// Returns `true` the moment the predicate is satisfied, `false` on
/// timeout. The last sleep is clamped to the remaining budget, so a
/// `false` comes back at the timeout boundary rather than up to a full
/// interval later. `None` for `timeout` polls forever.
pub async fn wait_for_condition<F, Fut>(
	mut predicate: F,
	interval: Duration,
	timeout: Option<Duration>,
) -> bool
where
	F: FnMut() -> Fut,
	Fut: Future<Output = bool>,
{
	let start = tokio::time::Instant::now();

	loop {
		if predicate().await {
			return true;
		}

		let next = match timeout {
			Some(limit) => match limit.checked_sub(start.elapsed()) {
				Some(remaining) if !remaining.is_zero() => interval.min(remaining),
				_ => return false,
			},
			None => interval,
		};
		tokio::time::sleep(next).await;
	}
}
