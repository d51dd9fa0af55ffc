//! # tunnel-scout
//!
//! Tunnel process supervisor for Rust CLIs.
//!
//! Launch tunneling commands (cloudflared, ngrok, `ssh -R`, …), watch
//! their combined output line by line, extract public URLs with
//! per-tunnel patterns, and report them through callbacks — while a local
//! port comes online.
//!
//! Emits structured [`tracing`] events; the embedding application owns
//! the subscriber.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tunnel_scout::{StartOptions, Supervisor, SupervisorConfig, TunnelSpec};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), tunnel_scout::Error> {
//! let sup = Supervisor::new(8188, SupervisorConfig::default());
//!
//! sup.register_tunnel(TunnelSpec::new(
//!     "cloudflared tunnel --url http://localhost:{port}",
//!     r"(https://\S+\.trycloudflare\.com)",
//!     "cloudflared",
//! ))
//! .await?;
//!
//! sup.start(StartOptions::default()).await?;
//! if let Some(report) = sup.wait_ready(Duration::from_secs(60)).await {
//!     for entry in &report {
//!         println!("{}: {:?}", entry.name, entry.url);
//!     }
//! }
//! sup.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod matcher;
pub mod output;
pub mod probe;
pub mod supervisor;
pub mod types;

mod runner;

pub use error::Error;
pub use matcher::{match_line, MatchedUrl};
pub use output::OutputCapture;
pub use probe::{is_port_in_use, wait_for_condition};
pub use supervisor::Supervisor;
pub use types::*;
