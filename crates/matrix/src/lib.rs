//! Client for the Matrix messaging API (templated HSM dispatch).

mod client;

pub use client::{HsmRequest, MatrixClient, MatrixError};
