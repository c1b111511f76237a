//! Client for the Hubsoft enrichment API.
//!
//! One [`HubsoftClient`] is created per query run and used sequentially by
//! that run's loop; there is no internal locking.

mod client;

pub use client::{find_invoice, HubsoftClient, HubsoftError};
