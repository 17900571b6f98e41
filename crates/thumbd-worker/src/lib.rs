//! Thumbnail worker pool.
//!
//! This crate provides:
//! - Process supervision of a fixed-size worker pool
//! - The per-worker claim, process and upload loop
//! - Periodic cache maintenance and resource resets
//! - An in-process event bus for hooking the pipeline

pub mod cli;
pub mod config;
pub mod console;
pub mod context;
pub mod error;
pub mod events;
pub mod logging;
pub mod maintenance;
pub mod pipeline;
pub mod process_table;
pub mod requirements;
pub mod retry;
pub mod runner;
pub mod supervisor;

pub use config::AppConfig;
pub use context::AppContext;
pub use error::{WorkerError, WorkerResult};
pub use events::EventBus;
pub use logging::ItemLogger;
pub use pipeline::RunOutcome;
pub use runner::Runner;
pub use supervisor::{ReconcileState, Scope, Supervisor};
