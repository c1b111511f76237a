//! Pure domain logic for the campaign orchestration backend.
//!
//! Everything in this crate is side-effect free: the SQL template engine,
//! the run/dispatch status vocabulary, text and date normalization, and the
//! HSM variable-resolution rules. Persistence and I/O live in the other
//! workspace crates, which all depend on this one.

pub mod dispatch;
pub mod error;
pub mod status;
pub mod template;
pub mod text;
pub mod types;
pub mod validate;

pub use error::CoreError;
