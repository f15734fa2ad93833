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

use std::sync::Arc;
use tracing::debug;

use plugverify_core::{DependencyFinder, DependencyResolution, PluginDependency, ResolvedDependency};

use crate::cache::{CacheError, CacheResult, DescriptorCache};
use crate::descriptors::{HostDescriptor, PluginDescriptor};
use crate::scheduler::CancellationToken;

/// Resolves dependencies among the plugins bundled with a host build first,
/// then through the plugin cache.
///
/// Plugins obtained from the cache are returned together with their cache
/// handle, so they stay alive for as long as the dependency graph holds them.
pub struct HostDependencyFinder<'a> {
    host: &'a HostDescriptor,
    plugins: &'a DescriptorCache<String, PluginDescriptor>,
    token: Option<&'a CancellationToken>,
}

impl<'a> HostDependencyFinder<'a> {
    pub fn new(host: &'a HostDescriptor, plugins: &'a DescriptorCache<String, PluginDescriptor>) -> Self {
        Self { host, plugins, token: None }
    }

    pub fn with_token(mut self, token: &'a CancellationToken) -> Self {
        self.token = Some(token);
        self
    }
}

impl DependencyFinder for HostDependencyFinder<'_> {
    fn find(&self, dependency: &PluginDependency) -> DependencyResolution {
        if let Some(bundled) = self.host.bundled_plugin(&dependency.id) {
            debug!(dependency = %dependency.id, host = %self.host.version, "Dependency bundled with host");
            return DependencyResolution::Found(ResolvedDependency::new(Arc::clone(bundled)));
        }

        let result = match self.token {
            Some(token) => self.plugins.get_cancellable(&dependency.id, token),
            None => self.plugins.get(&dependency.id),
        };
        match result {
            Ok(CacheResult::Found(handle)) => {
                let details = Arc::clone(&handle.details);
                DependencyResolution::Found(ResolvedDependency::new(details).with_keepalive(handle))
            }
            Ok(CacheResult::NotFound(reason)) => DependencyResolution::NotFound(reason),
            Ok(CacheResult::Failed { message, .. }) => DependencyResolution::NotFound(format!("Failed to obtain {}: {message}", dependency.id)),
            Err(CacheError::Cancelled(_)) => DependencyResolution::NotFound("Dependency resolution was interrupted".to_string()),
            Err(error @ CacheError::Closed(_)) => DependencyResolution::NotFound(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{BuildError, CacheOptions};
    use plugverify_core::{ClassIndex, PluginDetails, PluginInfo};

    fn host_with(bundled: &[&str]) -> HostDescriptor {
        let mut host = HostDescriptor::in_memory("241.1", ClassIndex::new("host"));
        for id in bundled {
            host.bundled_plugins.insert(id.to_string(), Arc::new(PluginDetails::new(PluginInfo::new(*id, "241.1"), ClassIndex::new(*id))));
        }
        host
    }

    fn plugin_cache() -> DescriptorCache<String, PluginDescriptor> {
        DescriptorCache::new("plugins", CacheOptions::default(), |id: &String| {
            if id == "com.lib" {
                Ok(PluginDescriptor::in_memory(PluginDetails::new(PluginInfo::new("com.lib", "3.0"), ClassIndex::new("lib"))))
            } else {
                Err(BuildError::NotFound(format!("Plugin {id} is not found in the repository")))
            }
        })
    }

    #[test]
    fn test_bundled_plugins_take_precedence() {
        let host = host_with(&["com.lib"]);
        let cache = plugin_cache();
        let finder = HostDependencyFinder::new(&host, &cache);

        let DependencyResolution::Found(resolved) = finder.find(&PluginDependency::mandatory("com.lib")) else {
            panic!("bundled plugin not found");
        };
        assert_eq!(resolved.details.info.version, "241.1");
        assert!(!resolved.has_keepalive());
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn test_cached_dependency_holds_handle() {
        let host = host_with(&[]);
        let cache = plugin_cache();
        let finder = HostDependencyFinder::new(&host, &cache);

        let DependencyResolution::Found(resolved) = finder.find(&PluginDependency::mandatory("com.lib")) else {
            panic!("dependency not resolved");
        };
        assert!(resolved.has_keepalive());
        assert_eq!(cache.ref_count(&"com.lib".to_string()), Some(1));

        drop(resolved);
        assert_eq!(cache.ref_count(&"com.lib".to_string()), Some(0));
    }

    #[test]
    fn test_unknown_dependency_carries_reason() {
        let host = host_with(&[]);
        let cache = plugin_cache();
        let finder = HostDependencyFinder::new(&host, &cache);

        match finder.find(&PluginDependency::optional("com.gone")) {
            DependencyResolution::NotFound(reason) => assert_eq!(reason, "Plugin com.gone is not found in the repository"),
            DependencyResolution::Found(_) => panic!("unexpected dependency"),
        }
    }
}
