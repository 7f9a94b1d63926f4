//! API gateway for the Akleao stock-research dashboard.
//!
//! The gateway sits between the browser and everything else: it encrypts
//! user-supplied LLM credentials at rest, keeps a per-user usage ledger,
//! maintains pinned-stock ordering, enforces the admin role on privileged
//! views, and forwards the remaining traffic to the analysis backend and
//! the market-data provider.

pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod server;
pub mod upstream;

pub use config::Config;
pub use error::{Error, Result};
