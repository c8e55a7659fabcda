pub mod analytics;
pub mod apis;
pub mod batch;
pub mod config;
pub mod constants;
#[cfg(feature = "db")]
pub mod db;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod normalize;
pub mod parsers;
pub mod pipeline;
pub mod sqlite;
pub mod storage;
pub mod types;
