//! Shared tracing bootstrap for the uptimed binaries.

mod subscriber;

pub use subscriber::{init, init_with_level};
pub use tracing::level_filters::LevelFilter;
