pub mod config;
pub mod format;
pub mod logging;

pub use config::Config;
