//! Datafile collector library
//!
//! Polls "file ready" notifications, fetches the announced files from
//! network elements over FTPES or SFTP, and publishes them to a DataRouter
//! feed. The core is `pipeline::Pipeline`; everything it talks to sits
//! behind a trait so the cycle can run against in-memory doubles.

pub mod cache;
pub mod cli;
pub mod collector;
pub mod config;
pub mod counters;
pub mod error;
pub mod http;
pub mod logging;
pub mod model;
pub mod notification;
pub mod pipeline;
pub mod protocols;
pub mod publisher;
pub mod retry;
pub mod shutdown;
pub mod source;

pub use cli::{parse_args, CliOptions};
pub use config::{parse_config, Config};
pub use logging::{log, log_at, log_with_worker, set_log_file, Level};
pub use pipeline::{Collaborators, CycleReport, Pipeline, PipelineSettings};
pub use shutdown::is_shutdown_requested;

/// Name of the program, used in usage and version output
pub const PROGRAM_NAME: &str = "datafile-collector";

/// Current version of the program (from Cargo.toml)
pub const PROGRAM_VERSION: &str = env!("CARGO_PKG_VERSION");
