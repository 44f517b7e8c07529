pub mod config;
pub mod executor;
pub mod worker;

pub use config::Config;
pub use worker::Worker;
