// Plugverify
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Verifier configuration
//!
//! Values come from defaults, a JSON file or `PLUGVERIFY_*` environment
//! variables. Invalid environment values are logged and ignored.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Directory holding the repositories and extracted artifacts
    pub home_dir: PathBuf,
    pub worker_threads: usize,
    pub host_cache_capacity: usize,
    pub jdk_cache_capacity: usize,
    pub plugin_cache_capacity: usize,
    /// Unreferenced descriptors older than this are evicted
    pub cache_idle_ttl_ms: Option<u64>,
    pub task_timeout_ms: Option<u64>,
    /// Package prefixes provided by the runtime environment
    pub external_prefixes: Vec<String>,
    pub recheck_interval_ms: Option<u64>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            home_dir: std::env::temp_dir().join("plugverify"),
            worker_threads: num_cpus::get(),
            host_cache_capacity: 4,
            jdk_cache_capacity: 2,
            plugin_cache_capacity: 64,
            cache_idle_ttl_ms: None,
            task_timeout_ms: None,
            external_prefixes: Vec::new(),
            recheck_interval_ms: None,
        }
    }
}

impl VerifierConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(home) = std::env::var("PLUGVERIFY_HOME") {
            config.home_dir = PathBuf::from(home);
        }
        if let Some(workers) = parse_var("PLUGVERIFY_WORKERS") {
            config.worker_threads = workers;
        }
        if let Some(capacity) = parse_var("PLUGVERIFY_HOST_CACHE") {
            config.host_cache_capacity = capacity;
        }
        if let Some(capacity) = parse_var("PLUGVERIFY_JDK_CACHE") {
            config.jdk_cache_capacity = capacity;
        }
        if let Some(capacity) = parse_var("PLUGVERIFY_PLUGIN_CACHE") {
            config.plugin_cache_capacity = capacity;
        }
        if let Some(ttl) = parse_var("PLUGVERIFY_CACHE_TTL_MS") {
            config.cache_idle_ttl_ms = Some(ttl);
        }
        if let Some(timeout) = parse_var("PLUGVERIFY_TASK_TIMEOUT_MS") {
            config.task_timeout_ms = Some(timeout);
        }
        if let Some(interval) = parse_var("PLUGVERIFY_RECHECK_INTERVAL_MS") {
            config.recheck_interval_ms = Some(interval);
        }
        if let Ok(prefixes) = std::env::var("PLUGVERIFY_EXTERNAL_PREFIXES") {
            config.external_prefixes = prefixes.split(',').map(str::trim).filter(|p| !p.is_empty()).map(String::from).collect();
        }

        config
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid("worker_threads must be at least 1".into()));
        }
        for (name, capacity) in [
            ("host_cache_capacity", self.host_cache_capacity),
            ("jdk_cache_capacity", self.jdk_cache_capacity),
            ("plugin_cache_capacity", self.plugin_cache_capacity),
        ] {
            if capacity == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
            }
        }
        if self.recheck_interval_ms == Some(0) {
            return Err(ConfigError::Invalid("recheck_interval_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn cache_idle_ttl(&self) -> Option<Duration> {
        self.cache_idle_ttl_ms.map(Duration::from_millis)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }

    pub fn recheck_interval(&self) -> Option<Duration> {
        self.recheck_interval_ms.map(Duration::from_millis)
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.home_dir.join("plugins")
    }

    pub fn hosts_dir(&self) -> PathBuf {
        self.home_dir.join("hosts")
    }

    pub fn extracted_dir(&self) -> PathBuf {
        self.home_dir.join("extracted")
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(variable = name, value = %value, "Invalid value, using default");
            None
        }
    }
}
