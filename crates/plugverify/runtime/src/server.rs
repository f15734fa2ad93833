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

//! Composition root of the verifier
//!
//! Shutdown order: re-check service, scheduler, then the plugin, host and
//! JDK caches.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

use plugverify_core::{ExternalClassesFilter, VerificationEngine, VerificationResult};

use crate::cache::{CacheOptions, DescriptorCache};
use crate::config::VerifierConfig;
use crate::descriptors::{host_builder, jdk_builder, plugin_builder};
use crate::error::{ConfigError, TaskResult};
use crate::recheck::{RecheckService, VerificationPlan};
use crate::repository::{ArtifactRepository, LocalRepository};
use crate::scheduler::{TaskHandle, TaskScheduler};
use crate::verify_task::{VerificationRequest, VerificationServices, VerifyPluginTask};

const DEFAULT_RECHECK_INTERVAL: Duration = Duration::from_secs(300);

pub struct ServerContext {
    config: VerifierConfig,
    plugin_repository: Arc<dyn ArtifactRepository>,
    host_repository: Arc<dyn ArtifactRepository>,
    services: VerificationServices,
    scheduler: Arc<TaskScheduler<u64>>,
    recheck: Mutex<Option<RecheckService>>,
    closed: AtomicBool,
}

impl ServerContext {
    /// Context over local repositories under the configured home directory
    pub fn new(config: VerifierConfig) -> Result<Self, ConfigError> {
        let plugins = LocalRepository::new(config.plugins_dir()).with_download_dir(config.extracted_dir());
        let hosts = LocalRepository::new(config.hosts_dir());
        Self::with_repositories(config, Arc::new(plugins), Arc::new(hosts))
    }

    pub fn with_repositories(config: VerifierConfig, plugin_repository: Arc<dyn ArtifactRepository>, host_repository: Arc<dyn ArtifactRepository>) -> Result<Self, ConfigError> {
        config.validate()?;

        let engine = VerificationEngine::new().with_external_classes(ExternalClassesFilter::new(&config.external_prefixes));
        let options = |capacity| CacheOptions::with_capacity(capacity).with_idle_ttl(config.cache_idle_ttl());
        let services = VerificationServices {
            engine: Arc::new(engine),
            hosts: DescriptorCache::new("hosts", options(config.host_cache_capacity), host_builder(Arc::clone(&host_repository))),
            jdks: DescriptorCache::new("jdks", options(config.jdk_cache_capacity), jdk_builder()),
            plugins: DescriptorCache::new("plugins", options(config.plugin_cache_capacity), plugin_builder(Arc::clone(&plugin_repository))),
        };

        let scheduler = Arc::new(TaskScheduler::new(config.worker_threads));
        scheduler.set_task_timeout(config.task_timeout());
        info!(home = %config.home_dir.display(), workers = scheduler.worker_count(), "Verifier context ready");

        Ok(Self {
            config,
            plugin_repository,
            host_repository,
            services,
            scheduler,
            recheck: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn services(&self) -> &VerificationServices {
        &self.services
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler<u64>> {
        &self.scheduler
    }

    pub fn plugin_repository(&self) -> &Arc<dyn ArtifactRepository> {
        &self.plugin_repository
    }

    pub fn host_repository(&self) -> &Arc<dyn ArtifactRepository> {
        &self.host_repository
    }

    /// Queues a verification; higher `priority` runs first
    pub fn submit(&self, plugin_id: &str, host_version: &str, jdk: impl Into<PathBuf>, priority: u64) -> TaskResult<TaskHandle<VerificationResult>> {
        self.submit_request(VerificationRequest::new(plugin_id, host_version, jdk), priority)
    }

    pub fn submit_request(&self, request: VerificationRequest, priority: u64) -> TaskResult<TaskHandle<VerificationResult>> {
        self.scheduler.submit(priority, VerifyPluginTask::new(request, self.services.clone()))
    }

    /// Starts re-verifying `plan`, replacing a running re-check service
    pub fn start_recheck(&self, plan: VerificationPlan) {
        let interval = self.config.recheck_interval().unwrap_or(DEFAULT_RECHECK_INTERVAL);
        let service = RecheckService::start(Arc::clone(&self.scheduler), self.services.clone(), plan, interval);
        if let Some(previous) = self.recheck.lock().replace(service) {
            previous.stop();
        }
    }

    pub fn recheck_results(&self) -> Vec<VerificationResult> {
        self.recheck.lock().as_ref().map(RecheckService::results).unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Closing verifier context");

        if let Some(recheck) = self.recheck.lock().take() {
            recheck.stop();
        }
        self.scheduler.shutdown();
        self.services.plugins.close();
        self.services.hosts.close();
        self.services.jdks.close();
        info!("Verifier context closed");
    }
}

impl Drop for ServerContext {
    fn drop(&mut self) {
        self.close();
    }
}
