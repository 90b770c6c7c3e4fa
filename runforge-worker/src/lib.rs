//! # Runforge Worker
//!
//! The execution side of Runforge: polls the store for pending executions,
//! schedules them against a bounded slot pool, runs them through an
//! [`executor::Executor`], and feeds results back through the shared
//! execution service.
//!
//! ## Modules
//!
//! - `executor`: the contract the actual script runner implements, plus the
//!   mock and local-process implementations
//! - `slots`: the global concurrency slot manager with per-user fairness
//! - `pool`: poller, dispatcher, and worker tasks
//! - `manager`: lifecycle (startup reaping, graceful stop, health/stats)

pub mod executor;
pub mod manager;
pub mod pool;
pub mod slots;
