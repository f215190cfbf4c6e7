//! fpid-worker library
//!
//! Background worker that pulls tasks from the shared queue and runs the
//! matching handler. Exposed as a library for integration testing.

pub mod context;
pub mod handlers;
pub mod logging;
pub mod registry;
pub mod worker;

pub use context::WorkerContext;
pub use handlers::default_registry;
pub use registry::{TaskHandler, TaskRegistry, TaskRegistryBuilder};
pub use worker::{Worker, WorkerSettings, WorkerStats};
