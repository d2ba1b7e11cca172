//! Cachewarden: keeps a model cache warm across a fleet of ComfyUI servers.

// Serde helper module.
mod serde;
// Command line arguments and configuration.
pub mod config;
// How to parse and represent servers.
pub mod server;
// The ComfyUI endpoints and response formats.
pub mod wire;
// HTTP session with one server.
pub mod session;
// Remedial jobs, their outcomes and the workflow payload.
pub mod job;
// Readiness checks.
pub mod probe;
// Workflow submission.
pub mod submit;
// Waiting for submitted jobs.
pub mod wait;
// Per-server probe/submit/wait.
pub mod reconcile;
// Fleet passes and triggers.
pub mod scheduler;
// HTTP API and status page.
pub mod api;
pub mod dashboard;
// CLI reports.
pub mod report;
// Log output.
pub mod logging;
// Error handling.
pub mod error;

#[cfg(test)]
mod testing;

pub use config::{Config, Mode};
pub use error::{CacheWardenError, TriggerError};
pub use job::{JobOutcome, JobReport, Workflow};
pub use probe::Readiness;
pub use reconcile::{ReconciliationResult, Reconciler};
pub use scheduler::{FleetReport, FleetScheduler, ServerStatus};
pub use server::{get_servers, Server};
pub use session::{HttpSession, Session, Timeouts};
pub use wait::WaitPolicy;
