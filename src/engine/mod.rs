//! External engine invocation: task descriptors, process execution, and
//! log-based success classification.

pub mod executor;
pub mod invocation;
pub mod log_scan;

pub use executor::Executor;
pub use invocation::{generate_task_descriptor, Invocation, TaskTemplate};
pub use log_scan::{check_engine_logs, classify, Classification, LogCheck, ENGINE_LOG_SIGNATURES};
