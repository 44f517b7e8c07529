use std::time::Duration;

use dispatch_core::{DispatchTiming, StoreLimits};
use envconfig::Envconfig;

#[derive(Envconfig)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3402")]
    pub port: u16,

    #[envconfig(default = "./dispatch-data")]
    pub store_path: String,

    /// GC is a no-op below this many bytes of job records.
    #[envconfig(default = "1073741824")]
    pub store_limit_bytes: u64,

    /// Terminal jobs become GC-eligible after this many seconds past `Finished`.
    #[envconfig(default = "86400")]
    pub purge_age_secs: u64,

    /// Workers must beat at least this often; expiry is 2x this value.
    #[envconfig(default = "60")]
    pub beat_interval_secs: u64,

    /// How often the dispatcher triggers a store GC pass.
    #[envconfig(default = "300")]
    pub collect_freq_secs: u64,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits {
            limit_bytes: self.store_limit_bytes,
            purge_age: Duration::from_secs(self.purge_age_secs),
        }
    }

    pub fn dispatch_timing(&self) -> DispatchTiming {
        DispatchTiming {
            beat_interval: Duration::from_secs(self.beat_interval_secs),
            collect_freq: Duration::from_secs(self.collect_freq_secs),
        }
    }
}
