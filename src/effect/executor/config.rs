//! Run-time configuration for the threads that execute fibers.
//!
//! Values come from [`RuntimeConfig::default`], the `with_*` builder
//! methods, or the environment:
//!
//! | Variable | Field |
//! |---|---|
//! | `LAMBARS_FX_WORKER_THREADS` | `worker_threads` |
//! | `LAMBARS_FX_MAX_BLOCKING_THREADS` | `max_blocking_threads` |
//! | `LAMBARS_FX_THREAD_NAME` | `thread_name` |
//!
//! # Examples
//!
//! ```rust
//! use lambars_fx::effect::RuntimeConfig;
//!
//! let config = RuntimeConfig::default()
//!     .with_worker_threads(2)
//!     .with_thread_name("io-worker");
//!
//! assert_eq!(config.worker_threads(), 2);
//! assert_eq!(config.thread_name(), "io-worker");
//! ```

/// Environment variable overriding [`RuntimeConfig::worker_threads`].
pub const WORKER_THREADS_VAR: &str = "LAMBARS_FX_WORKER_THREADS";
/// Environment variable overriding [`RuntimeConfig::max_blocking_threads`].
pub const MAX_BLOCKING_THREADS_VAR: &str = "LAMBARS_FX_MAX_BLOCKING_THREADS";
/// Environment variable overriding [`RuntimeConfig::thread_name`].
pub const THREAD_NAME_VAR: &str = "LAMBARS_FX_THREAD_NAME";

const DEFAULT_MAX_BLOCKING_THREADS: usize = 512;
const DEFAULT_THREAD_NAME: &str = "lambars-fx-worker";

/// Error returned when a configuration value is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A variable holds something that is not a positive integer.
    #[error("{variable} must be a positive integer, got {value:?}")]
    InvalidNumber {
        /// The variable name.
        variable: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A thread name variable is empty.
    #[error("{variable} must not be empty")]
    EmptyName {
        /// The variable name.
        variable: &'static str,
    },
}

/// Thread and runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    worker_threads: usize,
    max_blocking_threads: usize,
    thread_name: String,
    thread_stack_size: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
            max_blocking_threads: DEFAULT_MAX_BLOCKING_THREADS,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            thread_stack_size: None,
        }
    }
}

impl RuntimeConfig {
    /// Reads overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Reads overrides through `lookup`, starting from the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an invalid value.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = lookup(WORKER_THREADS_VAR) {
            config.worker_threads = parse_positive(WORKER_THREADS_VAR, &value)?;
        }
        if let Some(value) = lookup(MAX_BLOCKING_THREADS_VAR) {
            config.max_blocking_threads = parse_positive(MAX_BLOCKING_THREADS_VAR, &value)?;
        }
        if let Some(value) = lookup(THREAD_NAME_VAR) {
            let name = value.trim();
            if name.is_empty() {
                return Err(ConfigError::EmptyName {
                    variable: THREAD_NAME_VAR,
                });
            }
            config.thread_name = name.to_string();
        }
        Ok(config)
    }

    /// Sets the number of worker threads (at least one).
    #[must_use]
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads.max(1);
        self
    }

    /// Sets the upper bound of blocking threads (at least one).
    #[must_use]
    pub fn with_max_blocking_threads(mut self, max_blocking_threads: usize) -> Self {
        self.max_blocking_threads = max_blocking_threads.max(1);
        self
    }

    /// Sets the thread name prefix.
    #[must_use]
    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    /// Sets the stack size of spawned threads.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = Some(bytes);
        self
    }

    /// Number of worker threads.
    pub const fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    /// Upper bound of blocking threads.
    pub const fn max_blocking_threads(&self) -> usize {
        self.max_blocking_threads
    }

    /// Thread name prefix.
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// Stack size of spawned threads, if set.
    pub const fn thread_stack_size(&self) -> Option<usize> {
        self.thread_stack_size
    }

    /// Builds a multi-thread tokio runtime with these settings.
    ///
    /// # Errors
    ///
    /// Returns the I/O error tokio reports when the runtime cannot start.
    #[cfg(feature = "async")]
    pub fn build_runtime(&self) -> std::io::Result<tokio::runtime::Runtime> {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder
            .worker_threads(self.worker_threads)
            .max_blocking_threads(self.max_blocking_threads)
            .thread_name(self.thread_name.clone())
            .enable_all();
        if let Some(bytes) = self.thread_stack_size {
            builder.thread_stack_size(bytes);
        }
        builder.build()
    }
}

fn parse_positive(variable: &'static str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(ConfigError::InvalidNumber {
            variable,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[rstest]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert!(config.worker_threads() >= 1);
        assert_eq!(config.max_blocking_threads(), 512);
        assert_eq!(config.thread_name(), "lambars-fx-worker");
        assert_eq!(config.thread_stack_size(), None);
    }

    #[rstest]
    fn test_overrides_from_vars() {
        let config = RuntimeConfig::from_vars(vars(&[
            (WORKER_THREADS_VAR, "3"),
            (MAX_BLOCKING_THREADS_VAR, " 16 "),
            (THREAD_NAME_VAR, "fx"),
        ]))
        .unwrap();
        assert_eq!(config.worker_threads(), 3);
        assert_eq!(config.max_blocking_threads(), 16);
        assert_eq!(config.thread_name(), "fx");
    }

    #[rstest]
    #[case("0")]
    #[case("-1")]
    #[case("many")]
    fn test_invalid_number(#[case] value: &str) {
        let error = RuntimeConfig::from_vars(vars(&[(WORKER_THREADS_VAR, value)])).unwrap_err();
        assert_eq!(
            error,
            ConfigError::InvalidNumber {
                variable: WORKER_THREADS_VAR,
                value: value.to_string(),
            }
        );
    }

    #[rstest]
    fn test_empty_thread_name() {
        let error = RuntimeConfig::from_vars(vars(&[(THREAD_NAME_VAR, "  ")])).unwrap_err();
        assert_eq!(error.to_string(), "LAMBARS_FX_THREAD_NAME must not be empty");
    }

    #[rstest]
    fn test_builder_clamps_to_one() {
        let config = RuntimeConfig::default()
            .with_worker_threads(0)
            .with_max_blocking_threads(0);
        assert_eq!(config.worker_threads(), 1);
        assert_eq!(config.max_blocking_threads(), 1);
    }
}
