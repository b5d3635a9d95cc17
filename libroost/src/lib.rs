//! roost - fleet posting scheduler for the X platform
//!
//! This library carries the whole publisher core: sealed credential
//! storage, the similarity engine, the platform HTTP client, the risk
//! envelope, the dispatch planner, and the publisher cycle that drains
//! due schedules at cron ticks.

pub mod config;
pub mod crypto;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod platform;
pub mod publisher;
pub mod risk;
pub mod similarity;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use crypto::SecretBox;
pub use db::Database;
pub use error::{Result, RoostError};
pub use publisher::{CycleSummary, Publisher};
