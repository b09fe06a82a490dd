//! Sandboxed code execution on Kubernetes pods.
//!
//! podbox provisions an isolated, scheduler-managed workload with hardened
//! security constraints, routes code-execution requests to the endpoint
//! running inside it, enforces timeouts at both the orchestration and
//! execution layers, and recovers from failure by tearing the environment
//! down and recreating it.
//!
//! Three layers:
//! - [`server`]: the execution endpoint that runs inside the workload and
//!   executes submitted code against a restricted namespace.
//! - [`manager`]: the lifecycle manager that provisions, monitors, and
//!   tears down one workload + service pairing per session.
//! - [`facade`]: a blocking handle for synchronous callers, with scoped
//!   acquisition and guaranteed teardown.

pub mod config;
pub mod error;
pub mod facade;
pub mod manager;
pub mod protocol;
pub mod scheduler;
pub mod server;
pub mod session;

pub use error::{SandboxError, SchedulerError};
pub use facade::PodSandbox;
pub use manager::PodManager;
pub use session::{SessionInfo, SessionState};
