//! Persistence layer: sqlx models, repositories, and migrations for the
//! campaign orchestration backend's own Postgres database.
//!
//! External *source* databases (the ones campaign SQL templates run
//! against) are not managed here; see `campaign-pipeline`.

pub mod models;
pub mod repositories;

/// Embedded migrations, applied by the worker binary at startup.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
