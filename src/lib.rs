//! Library exports for the binary, benchmarks and tests.
/// Per-user application directories.
pub mod app_dirs;
/// Layered run configuration.
pub mod config;
/// Append-only CSV results ledger.
pub mod ledger;
/// Tracing subscriber setup.
pub mod logging;
/// End-to-end orchestration of one run.
pub mod pipeline;
/// Bounded blocking work queue.
pub mod queue;
/// Dataset enumeration, shuffling and enqueueing.
pub mod scheduler;
/// Per-item seed derivation.
pub mod seed;
/// Two-stage interrupt handling.
pub mod shutdown;
/// Shared work item types.
pub mod types;
/// Per-item processing and the worker loop.
pub mod worker;
