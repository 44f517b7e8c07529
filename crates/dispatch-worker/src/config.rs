use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig)]
pub struct Config {
    #[envconfig(from = "SERVER_URL", default = "http://localhost:3402")]
    pub server_url: String,

    /// Seconds to wait after a connection failure or an empty `Fetch` before retrying.
    #[envconfig(default = "10")]
    pub wait_secs: u64,

    /// Seconds between `Beat` calls while a job is running.
    #[envconfig(default = "60")]
    pub beat_interval_secs: u64,

    /// Exit if no job has been obtained for this many seconds. 0 disables the check.
    #[envconfig(default = "0")]
    pub max_idle_secs: u64,

    /// Comma-separated list of allowed `Cmd[0]` values. Empty means no restriction.
    #[envconfig(default = "")]
    pub whitelist: String,

    #[envconfig(default = "./dispatch-worker-scratch")]
    pub scratch_root: String,

    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub health_host: String,

    #[envconfig(from = "BIND_PORT", default = "3403")]
    pub health_port: u16,
}

impl Config {
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }

    pub fn beat_interval(&self) -> Duration {
        Duration::from_secs(self.beat_interval_secs)
    }

    pub fn max_idle(&self) -> Option<Duration> {
        (self.max_idle_secs > 0).then(|| Duration::from_secs(self.max_idle_secs))
    }

    pub fn whitelist(&self) -> Vec<String> {
        self.whitelist
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn health_bind(&self) -> String {
        format!("{}:{}", self.health_host, self.health_port)
    }
}
