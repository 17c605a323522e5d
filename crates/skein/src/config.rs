// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Context configuration.

/// Environment variable read by [`ContextConfig::from_env`].
pub const WORKERS_ENV: &str = "SKEIN_WORKERS";

/// How a [`CoroutineContext`](crate::CoroutineContext) builds its own
/// executor and timer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ContextConfig {
    /// Worker threads. 0 means one per available CPU.
    pub workers: usize,
    /// Worker threads are named `{worker_name}-{index}`.
    pub worker_name: String,
    pub timer_name: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            worker_name: "skein-worker".to_string(),
            timer_name: "skein-timer".to_string(),
        }
    }
}

impl ContextConfig {
    /// Defaults, with `workers` taken from `SKEIN_WORKERS` when set.
    pub fn from_env() -> Self {
        Self::default().with_env_workers(std::env::var(WORKERS_ENV).ok().as_deref())
    }

    fn with_env_workers(self, raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => self,
            Some(value) => match value.parse::<usize>() {
                Ok(workers) => self.with_workers(workers),
                Err(err) => {
                    tracing::warn!(%err, value, "ignoring invalid {}", WORKERS_ENV);
                    self
                }
            },
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    pub fn with_timer_name(mut self, name: impl Into<String>) -> Self {
        self.timer_name = name.into();
        self
    }
}
