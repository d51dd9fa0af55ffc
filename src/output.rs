use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::Mutex;

const RING_CAPACITY: usize = 512;

/// Captures one tunnel's combined output, line by line.
///
/// Keeps the most recent lines in memory, optionally appends them to
/// `tunnel_<name>.log` (truncated at session start), and fans them out to
/// live subscribers.
#[derive(Clone)]
pub struct OutputCapture {
	ring: Arc<Mutex<VecDeque<String>>>,
	file: Arc<Mutex<Option<File>>>,
	sender: broadcast::Sender<String>,
}

impl OutputCapture {
	pub fn new(log_dir: Option<&Path>, name: &str) -> Self {
		let file = log_dir.and_then(|dir| {
			let _ = std::fs::create_dir_all(dir);
			OpenOptions::new()
				.create(true)
				.write(true)
				.truncate(true)
				.open(dir.join(format!("tunnel_{}.log", name)))
				.ok()
		});

		let (sender, _) = broadcast::channel(256);

		Self {
			ring: Arc::new(Mutex::new(VecDeque::with_capacity(RING_CAPACITY))),
			file: Arc::new(Mutex::new(file)),
			sender,
		}
	}

	pub async fn push_line(&self, line: &str) {
		{
			let mut ring = self.ring.lock().await;
			if ring.len() >= RING_CAPACITY {
				ring.pop_front();
			}
			ring.push_back(line.to_string());
		}

		{
			let mut file = self.file.lock().await;
			if let Some(ref mut f) = *file {
				let _ = writeln!(f, "{}", line);
			}
		}

		let _ = self.sender.send(line.to_string());
	}

	pub async fn snapshot(&self) -> Vec<String> {
		let ring = self.ring.lock().await;
		ring.iter().cloned().collect()
	}

	pub fn subscribe(&self) -> broadcast::Receiver<String> {
		self.sender.subscribe()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn ring_and_subscribers_see_lines() {
		let capture = OutputCapture::new(None, "t");
		let mut rx = capture.subscribe();

		capture.push_line("hello").await;

		assert_eq!(capture.snapshot().await, vec!["hello".to_string()]);
		assert_eq!(rx.recv().await.unwrap(), "hello");
	}

	#[tokio::test]
	async fn ring_is_bounded() {
		let capture = OutputCapture::new(None, "t");
		for i in 0..(RING_CAPACITY + 10) {
			capture.push_line(&format!("line {}", i)).await;
		}

		let lines = capture.snapshot().await;
		assert_eq!(lines.len(), RING_CAPACITY);
		assert_eq!(lines[0], "line 10");
	}
}
