//! Row models and DTOs, one module per table family.

pub mod client;
pub mod credential;
pub mod dispatch_run;
pub mod matrix;
pub mod query_run;
pub mod query_template;
