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

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use plugverify_core::{PluginInfo, Verdict, VerificationEngine, VerificationError, VerificationInput, VerificationResult, VerificationTarget};

use crate::cache::{CacheError, CacheKey, CacheResult, Closeable, DescriptorCache, Handle};
use crate::descriptors::{HostDescriptor, JdkDescriptor, PluginDescriptor};
use crate::error::{TaskError, TaskResult};
use crate::finder::HostDependencyFinder;
use crate::scheduler::{CancellationToken, ProgressIndicator, ServiceTask};

/// One plugin to verify against one host build and JDK
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerificationRequest {
    pub plugin_id: String,
    pub host_version: String,
    pub jdk: PathBuf,
}

impl VerificationRequest {
    pub fn new(plugin_id: impl Into<String>, host_version: impl Into<String>, jdk: impl Into<PathBuf>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            host_version: host_version.into(),
            jdk: jdk.into(),
        }
    }

    pub fn target(&self) -> VerificationTarget {
        let jdk = self.jdk.file_name().map_or_else(|| self.jdk.display().to_string(), |name| name.to_string_lossy().into_owned());
        VerificationTarget::new(self.host_version.clone(), jdk)
    }
}

impl fmt::Display for VerificationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} against {}", self.plugin_id, self.target())
    }
}

/// Engine and caches shared by every verification task
#[derive(Clone)]
pub struct VerificationServices {
    pub engine: Arc<VerificationEngine>,
    pub hosts: DescriptorCache<String, HostDescriptor>,
    pub jdks: DescriptorCache<PathBuf, JdkDescriptor>,
    pub plugins: DescriptorCache<String, PluginDescriptor>,
}

/// Verifies one plugin against one target.
///
/// Descriptors that cannot be obtained turn into `NotFound` or
/// `FailedToDownload` verdicts; the task itself only fails when cancelled or
/// when the caches are gone.
pub struct VerifyPluginTask {
    request: VerificationRequest,
    services: VerificationServices,
}

impl VerifyPluginTask {
    pub fn new(request: VerificationRequest, services: VerificationServices) -> Self {
        Self { request, services }
    }

    pub fn request(&self) -> &VerificationRequest {
        &self.request
    }
}

enum Acquired<K: CacheKey, T: Closeable> {
    Ready(Handle<K, T>),
    Unavailable(Verdict),
}

fn acquire<K: CacheKey, T: Closeable>(cache: &DescriptorCache<K, T>, key: &K, token: &CancellationToken) -> TaskResult<Acquired<K, T>> {
    match cache.get_cancellable(key, token) {
        Ok(CacheResult::Found(handle)) => Ok(Acquired::Ready(handle)),
        Ok(CacheResult::NotFound(reason)) => Ok(Acquired::Unavailable(Verdict::NotFound { reason })),
        Ok(CacheResult::Failed { message, .. }) => Ok(Acquired::Unavailable(Verdict::FailedToDownload { reason: message })),
        Err(CacheError::Cancelled(reason)) => Err(TaskError::Cancelled(reason)),
        Err(error @ CacheError::Closed(_)) => Err(TaskError::Failed(error.to_string())),
    }
}

impl ServiceTask for VerifyPluginTask {
    type Output = VerificationResult;

    fn name(&self) -> String {
        format!("Verify {}", self.request)
    }

    fn execute(self, progress: &ProgressIndicator, token: &CancellationToken) -> TaskResult<VerificationResult> {
        let target = self.request.target();
        let services = &self.services;

        let plugin = match acquire(&services.plugins, &self.request.plugin_id, token)? {
            Acquired::Ready(plugin) => plugin,
            Acquired::Unavailable(verdict) => {
                debug!(request = %self.request, verdict = %verdict, "Plugin is unavailable");
                return Ok(VerificationResult::new(PluginInfo::unresolved(&self.request.plugin_id), target, verdict));
            }
        };
        progress.set(0.05);

        let host = match acquire(&services.hosts, &self.request.host_version, token)? {
            Acquired::Ready(host) => host,
            Acquired::Unavailable(verdict) => return Ok(VerificationResult::new(plugin.info().clone(), target, verdict)),
        };
        let jdk = match acquire(&services.jdks, &self.request.jdk, token)? {
            Acquired::Ready(jdk) => jdk,
            Acquired::Unavailable(verdict) => return Ok(VerificationResult::new(plugin.info().clone(), target, verdict)),
        };
        progress.set(0.1);
        token.check()?;

        let finder = HostDependencyFinder::new(&host, &services.plugins).with_token(token);
        let input = VerificationInput {
            plugin: &plugin.details,
            target,
            host: &host.classes,
            jdk: &jdk.classes,
            dependency_finder: &finder,
        };

        match services.engine.verify_with(&input, &mut |fraction| progress.set(0.1 + 0.9 * fraction), &|| token.is_cancelled()) {
            Ok(result) => Ok(result),
            Err(VerificationError::Interrupted) => Err(TaskError::Cancelled(token.reason().unwrap_or_else(|| "interrupted".to_string()))),
            Err(VerificationError::ClasspathUnavailable(error)) => Ok(VerificationResult::new(
                plugin.info().clone(),
                input.target.clone(),
                Verdict::FailedToDownload { reason: error.to_string() },
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{BuildError, CacheOptions};
    use crate::descriptors::{PLUGIN_MANIFEST, plugin_builder};
    use crate::error::RepositoryError;
    use crate::repository::{ArtifactInfo, DownloadedArtifact, MockArtifactRepository};
    use plugverify_core::classes::ClassFileBuilder;
    use plugverify_core::{AccessFlags, ClassDefinition, ClassIndex, VerdictKind, JAVA_LANG_OBJECT};
    use std::fs;

    fn services(repository: MockArtifactRepository) -> VerificationServices {
        let host_classes = || {
            ClassIndex::from_definitions(
                "host",
                [ClassDefinition::new("h/Service", AccessFlags::new(AccessFlags::PUBLIC))
                    .with_super(JAVA_LANG_OBJECT)
                    .with_method(plugverify_core::MethodInfo::new("start", "()V", AccessFlags::new(AccessFlags::PUBLIC)))],
            )
        };
        VerificationServices {
            engine: Arc::new(VerificationEngine::new()),
            hosts: DescriptorCache::new("hosts", CacheOptions::default(), move |version: &String| {
                if version == "241.1" {
                    Ok(HostDescriptor::in_memory(version, host_classes()))
                } else {
                    Err(BuildError::NotFound(format!("Host build {version} is not found in the repository")))
                }
            }),
            jdks: DescriptorCache::new("jdks", CacheOptions::default(), |_: &PathBuf| {
                Ok(JdkDescriptor::in_memory(
                    "17",
                    ClassIndex::from_definitions("jdk", [ClassDefinition::new(JAVA_LANG_OBJECT, AccessFlags::new(AccessFlags::PUBLIC))]),
                ))
            }),
            plugins: DescriptorCache::new("plugins", CacheOptions::default(), plugin_builder(Arc::new(repository))),
        }
    }

    fn run(task: VerifyPluginTask) -> TaskResult<VerificationResult> {
        task.execute(&ProgressIndicator::detached(), &CancellationToken::new())
    }

    #[test]
    fn test_unknown_plugin_yields_not_found_verdict() {
        let mut repository = MockArtifactRepository::new();
        repository.expect_fetch_metadata().times(1).returning(|_| Ok(None));
        repository.expect_download().never();

        let result = run(VerifyPluginTask::new(VerificationRequest::new("com.gone", "241.1", "/jdks/17"), services(repository))).unwrap();

        assert_eq!(result.plugin, PluginInfo::unresolved("com.gone"));
        assert_eq!(result.verdict, Verdict::NotFound {
            reason: "Plugin com.gone is not found in the repository".into()
        });
    }

    #[test]
    fn test_repository_failure_yields_failed_to_download() {
        let mut repository = MockArtifactRepository::new();
        repository.expect_fetch_metadata().returning(|id| {
            Ok(Some(ArtifactInfo {
                id: id.to_string(),
                version: "1.0".into(),
                update_id: None,
                location: "remote".into(),
            }))
        });
        repository
            .expect_download()
            .times(1)
            .returning(|_| Err(RepositoryError::Unavailable("connection reset".into())));

        let result = run(VerifyPluginTask::new(VerificationRequest::new("com.example", "241.1", "/jdks/17"), services(repository))).unwrap();

        assert_eq!(result.verdict.kind(), VerdictKind::FailedToDownload);
    }

    /// Plugin package on disk served by a mocked repository
    fn repository_serving_plugin(dir: &std::path::Path) -> MockArtifactRepository {
        let artifact = dir.join("com.example");
        fs::create_dir_all(artifact.join("classes/p")).unwrap();
        fs::write(artifact.join(PLUGIN_MANIFEST), r#"{ "id": "com.example", "version": "1.0" }"#).unwrap();
        fs::write(
            artifact.join("classes/p/Client.class"),
            ClassFileBuilder::new("p/Client", AccessFlags::PUBLIC)
                .super_class(JAVA_LANG_OBJECT)
                .method_reference("h/Service", "start", "()V")
                .method_reference("h/Service", "stop", "()V")
                .build(),
        )
        .unwrap();

        let location = artifact.display().to_string();
        let mut repository = MockArtifactRepository::new();
        repository.expect_fetch_metadata().times(1).returning(move |id| {
            Ok(Some(ArtifactInfo {
                id: id.to_string(),
                version: "1.0".into(),
                update_id: Some(10),
                location: location.clone(),
            }))
        });
        repository.expect_download().times(1).returning(|info| {
            Ok(DownloadedArtifact {
                path: PathBuf::from(&info.location),
                temporary: false,
            })
        });
        repository
    }

    #[test]
    fn test_downloaded_plugin_is_verified() {
        let dir = tempfile::tempdir().unwrap();
        let progress = ProgressIndicator::detached();
        let task = VerifyPluginTask::new(VerificationRequest::new("com.example", "241.1", "/jdks/17"), services(repository_serving_plugin(dir.path())));

        let result = task.execute(&progress, &CancellationToken::new()).unwrap();

        assert_eq!(result.plugin.id, "com.example");
        assert_eq!(result.target, VerificationTarget::new("241.1", "17"));
        assert_eq!(result.verdict.kind(), VerdictKind::Problems);
        assert_eq!(result.verdict.problems().map(|problems| problems.len()), Some(1));
        assert_eq!(progress.fraction(), 1.0);
    }

    #[test]
    fn test_missing_host_reported_with_plugin_identity() {
        let dir = tempfile::tempdir().unwrap();
        let task = VerifyPluginTask::new(VerificationRequest::new("com.example", "999.0", "/jdks/17"), services(repository_serving_plugin(dir.path())));

        let result = run(task).unwrap();

        assert_eq!(result.plugin, PluginInfo::new("com.example", "1.0").with_update_id(10));
        assert_eq!(result.verdict, Verdict::NotFound {
            reason: "Host build 999.0 is not found in the repository".into()
        });
    }

    #[test]
    fn test_cancellation_before_verification_cancels_task() {
        let dir = tempfile::tempdir().unwrap();
        let services = services(repository_serving_plugin(dir.path()));
        let plugins = services.plugins.clone();
        let token = CancellationToken::new();
        token.cancel("stop");

        let result = VerifyPluginTask::new(VerificationRequest::new("com.example", "241.1", "/jdks/17"), services).execute(&ProgressIndicator::detached(), &token);

        assert_eq!(result.unwrap_err(), TaskError::Cancelled("stop".into()));
        assert_eq!(plugins.ref_count(&"com.example".to_string()), Some(0));
    }

    #[test]
    fn test_closed_cache_fails_task() {
        let services = services(MockArtifactRepository::new());
        services.plugins.close();

        let result = run(VerifyPluginTask::new(VerificationRequest::new("com.example", "241.1", "/jdks/17"), services));

        assert!(matches!(result, Err(TaskError::Failed(message)) if message.contains("closed")));
    }
}
