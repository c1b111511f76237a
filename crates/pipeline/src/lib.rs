//! Run orchestration: the two background loops (client query + HSM
//! dispatch), the per-record processor, the external SQL query client,
//! the live-run registry, and the service surface presentation layers
//! call into.

pub mod context;
pub mod dispatch_run;
pub mod error;
pub mod processor;
pub mod query_run;
pub mod registry;
pub mod service;
pub mod source;

pub use context::PipelineContext;
pub use error::PipelineError;
pub use registry::{RunKind, RunRegistry};
