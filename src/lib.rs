pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod protocol;
pub mod query;
pub mod reading;
pub mod session;
pub mod shell;
