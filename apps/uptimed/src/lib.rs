//! uptimed - periodic HTTP health checks with rolling uptime stats
//!
//! The daemon probes every active monitor on a fixed interval, keeps the
//! outcomes in a local libsql database and answers client requests over
//! ZeroMQ. The same crate holds the client used by the CLI and the watch
//! display.

pub mod client;
pub mod config;
pub mod daemon;
pub mod database;
pub mod error;
pub mod monitoring;
pub mod pool;
pub mod registry;
pub mod stats;
pub mod validation;
