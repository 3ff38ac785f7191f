use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EngineConfig {
    pub dispatcher: DispatcherConfig,
    pub lifecycle: LifecycleConfig,
    pub demo: DemoConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DispatcherConfig {
    /// Number of worker threads servicing the completion queue
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Prefix for worker thread names
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LifecycleConfig {
    /// Upper bound the runner waits for a component to start
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// Upper bound the runner waits for a component to terminate
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Lifecycle event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DemoConfig {
    /// Number of sessions the demo endpoint registers on startup
    #[serde(default = "default_sessions")]
    pub sessions: usize,

    /// Simulated latency of each asynchronous step
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,

    /// Index of a session whose startup fails, if any
    #[serde(default)]
    pub fail_session: Option<usize>,
}

impl LifecycleConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl DemoConfig {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

impl EngineConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("lifecycle.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("dispatcher.worker_threads", default_worker_threads() as i64)?
            .set_default("dispatcher.thread_name", default_thread_name())?
            .set_default(
                "lifecycle.startup_timeout_ms",
                default_startup_timeout_ms() as i64,
            )?
            .set_default(
                "lifecycle.shutdown_timeout_ms",
                default_shutdown_timeout_ms() as i64,
            )?
            .set_default(
                "lifecycle.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default("demo.sessions", default_sessions() as i64)?
            .set_default("demo.step_delay_ms", default_step_delay_ms() as i64)?
            .add_source(File::with_name(&path_str).required(false))
            // LIFECYCLE_DISPATCHER__WORKER_THREADS=8
            .add_source(
                Environment::with_prefix("LIFECYCLE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatcher.worker_threads == 0 {
            return Err(ConfigError::Message(
                "Dispatcher worker_threads must be greater than 0".to_string(),
            ));
        }

        if self.dispatcher.thread_name.trim().is_empty() {
            return Err(ConfigError::Message(
                "Dispatcher thread_name must not be empty".to_string(),
            ));
        }

        if self.lifecycle.startup_timeout_ms == 0 || self.lifecycle.shutdown_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Lifecycle timeouts must be greater than 0".to_string(),
            ));
        }

        if self.lifecycle.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        if let Some(index) = self.demo.fail_session {
            if index >= self.demo.sessions {
                return Err(ConfigError::Message(format!(
                    "Demo fail_session {} is out of range for {} sessions",
                    index, self.demo.sessions
                )));
            }
        }

        Ok(())
    }

    /// Render the configuration as a TOML document
    pub fn to_toml(&self) -> crate::error::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            lifecycle: LifecycleConfig {
                startup_timeout_ms: default_startup_timeout_ms(),
                shutdown_timeout_ms: default_shutdown_timeout_ms(),
                event_bus_capacity: default_event_bus_capacity(),
            },
            demo: DemoConfig {
                sessions: default_sessions(),
                step_delay_ms: default_step_delay_ms(),
                fail_session: None,
            },
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            thread_name: default_thread_name(),
        }
    }
}

// Default value functions
fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
fn default_thread_name() -> String {
    "lifecycle-worker".to_string()
}

fn default_startup_timeout_ms() -> u64 {
    30_000
}
fn default_shutdown_timeout_ms() -> u64 {
    10_000
}
fn default_event_bus_capacity() -> usize {
    256
}

fn default_sessions() -> usize {
    3
}
fn default_step_delay_ms() -> u64 {
    50
}
