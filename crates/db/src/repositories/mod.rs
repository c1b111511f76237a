//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&PgPool` as the first argument.

pub mod client_repo;
pub mod credential_repo;
pub mod dispatch_result_repo;
pub mod dispatch_run_repo;
pub mod matrix_repo;
pub mod query_run_repo;
pub mod query_template_repo;
pub mod result_repo;

pub use client_repo::ClientRepo;
pub use credential_repo::{DbCredentialRepo, HubsoftCredentialRepo};
pub use dispatch_result_repo::DispatchResultRepo;
pub use dispatch_run_repo::DispatchRunRepo;
pub use matrix_repo::{HsmTemplateRepo, MatrixConfigRepo};
pub use query_run_repo::QueryRunRepo;
pub use query_template_repo::QueryTemplateRepo;
pub use result_repo::ClientQueryResultRepo;
