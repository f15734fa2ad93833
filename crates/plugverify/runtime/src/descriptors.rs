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

//! Cached descriptors of host builds, JDKs and plugins
//!
//! Layouts on disk:
//! - host build: `classes/` plus bundled plugins under `plugins/<id>/`
//! - JDK: a tree of `.class` files
//! - plugin: `plugin.json` plus `classes/`

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use plugverify_core::{ClassIndex, PluginDependency, PluginDetails, PluginInfo, PluginStructureError};

use crate::cache::{BoxError, BuildError, Closeable};
use crate::error::LoadError;
use crate::repository::{ArtifactInfo, ArtifactRepository, DownloadedArtifact};

pub const PLUGIN_MANIFEST: &str = "plugin.json";

/// Directory backing a descriptor, removed on close when owned
#[derive(Debug)]
pub struct ExtractedArtifact {
    path: PathBuf,
    delete_on_close: bool,
    closed: AtomicBool,
}

impl ExtractedArtifact {
    pub fn new(path: impl Into<PathBuf>, delete_on_close: bool) -> Self {
        Self {
            path: path.into(),
            delete_on_close,
            closed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn close(&self) -> std::io::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) || !self.delete_on_close || !self.path.exists() {
            return Ok(());
        }
        debug!(path = %self.path.display(), "Removing extracted artifact");
        fs::remove_dir_all(&self.path)
    }
}

impl From<DownloadedArtifact> for ExtractedArtifact {
    fn from(downloaded: DownloadedArtifact) -> Self {
        Self::new(downloaded.path, downloaded.temporary)
    }
}

/// Runs `load` against the artifact, discarding the artifact when it fails
fn load_from<T>(artifact: ExtractedArtifact, load: impl FnOnce(&Path) -> Result<T, LoadError>) -> Result<(T, ExtractedArtifact), LoadError> {
    match load(artifact.path()) {
        Ok(value) => Ok((value, artifact)),
        Err(error) => {
            if let Err(close_error) = artifact.close() {
                warn!(path = %artifact.path().display(), error = %close_error, "Failed to discard artifact");
            }
            Err(error)
        }
    }
}

fn require_dir(path: &Path) -> Result<(), LoadError> {
    if path.is_dir() { Ok(()) } else { Err(LoadError::MissingArtifact(path.to_path_buf())) }
}

#[derive(Debug)]
pub struct HostDescriptor {
    pub version: String,
    pub classes: ClassIndex,
    pub bundled_plugins: HashMap<String, Arc<PluginDetails>>,
    artifact: ExtractedArtifact,
}

impl HostDescriptor {
    pub fn load(version: &str, artifact: ExtractedArtifact) -> Result<Self, LoadError> {
        let ((classes, bundled_plugins), artifact) = load_from(artifact, |root| {
            require_dir(root)?;
            let classes_dir = root.join("classes");
            let classes = if classes_dir.is_dir() {
                ClassIndex::load_directory(format!("host {version}"), &classes_dir)?
            } else {
                ClassIndex::new(format!("host {version}"))
            };

            let mut bundled = HashMap::new();
            let plugins_dir = root.join("plugins");
            if plugins_dir.is_dir() {
                let entries = fs::read_dir(&plugins_dir).map_err(|source| LoadError::Io { path: plugins_dir.clone(), source })?;
                for entry in entries {
                    let entry = entry.map_err(|source| LoadError::Io { path: plugins_dir.clone(), source })?;
                    if entry.path().is_dir() {
                        let fallback = entry.file_name().to_string_lossy().into_owned();
                        let details = load_plugin_details(&entry.path(), PluginInfo::new(fallback, version))?;
                        bundled.insert(details.info.id.clone(), Arc::new(details));
                    }
                }
            }
            Ok((classes, bundled))
        })?;

        debug!(version, classes = classes.len(), bundled = bundled_plugins.len(), "Loaded host build");
        Ok(Self {
            version: version.to_string(),
            classes,
            bundled_plugins,
            artifact,
        })
    }

    /// Host build without any backing directory
    pub fn in_memory(version: &str, classes: ClassIndex) -> Self {
        Self {
            version: version.to_string(),
            classes,
            bundled_plugins: HashMap::new(),
            artifact: ExtractedArtifact::new(PathBuf::new(), false),
        }
    }

    pub fn bundled_plugin(&self, id: &str) -> Option<&Arc<PluginDetails>> {
        self.bundled_plugins.get(id)
    }

    pub fn path(&self) -> &Path {
        self.artifact.path()
    }
}

impl Closeable for HostDescriptor {
    fn close(&self) -> Result<(), BoxError> {
        self.artifact.close().map_err(Into::into)
    }
}

#[derive(Debug)]
pub struct JdkDescriptor {
    pub name: String,
    pub classes: ClassIndex,
    artifact: ExtractedArtifact,
}

impl JdkDescriptor {
    /// Indexes a JDK class tree in place; the tree is never deleted
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        require_dir(path)?;
        let name = path.file_name().map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned());
        let classes = ClassIndex::load_directory(format!("jdk {name}"), path)?;
        debug!(jdk = %name, classes = classes.len(), "Loaded JDK");
        Ok(Self {
            name,
            classes,
            artifact: ExtractedArtifact::new(path, false),
        })
    }
}

impl JdkDescriptor {
    pub fn in_memory(name: impl Into<String>, classes: ClassIndex) -> Self {
        Self {
            name: name.into(),
            classes,
            artifact: ExtractedArtifact::new(PathBuf::new(), false),
        }
    }
}

impl Closeable for JdkDescriptor {
    fn close(&self) -> Result<(), BoxError> {
        self.artifact.close().map_err(Into::into)
    }
}

#[derive(Debug)]
pub struct PluginDescriptor {
    pub details: Arc<PluginDetails>,
    artifact: ExtractedArtifact,
}

impl PluginDescriptor {
    pub fn load(info: &ArtifactInfo, artifact: ExtractedArtifact) -> Result<Self, LoadError> {
        let (details, artifact) = load_from(artifact, |root| {
            require_dir(root)?;
            let mut fallback = PluginInfo::new(info.id.clone(), info.version.clone());
            fallback.update_id = info.update_id;
            load_plugin_details(root, fallback)
        })?;
        Ok(Self {
            details: Arc::new(details),
            artifact,
        })
    }

    pub fn in_memory(details: PluginDetails) -> Self {
        Self {
            details: Arc::new(details),
            artifact: ExtractedArtifact::new(PathBuf::new(), false),
        }
    }

    pub fn info(&self) -> &PluginInfo {
        &self.details.info
    }
}

impl Closeable for PluginDescriptor {
    fn close(&self) -> Result<(), BoxError> {
        self.artifact.close().map_err(Into::into)
    }
}

#[derive(Debug, Deserialize)]
struct PluginManifest {
    #[serde(default)]
    id: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    update_id: Option<u64>,
    #[serde(default)]
    dependencies: Vec<PluginDependency>,
    #[serde(default)]
    dependent_classes: HashMap<String, Vec<String>>,
    #[serde(default)]
    components: Vec<String>,
    #[serde(default)]
    non_dynamic_extensions: Vec<String>,
}

/// Reads a plugin directory. Defects of the package itself become structure
/// errors on the returned details; only I/O on the directory fails.
pub fn load_plugin_details(root: &Path, fallback: PluginInfo) -> Result<PluginDetails, LoadError> {
    let manifest_path = root.join(PLUGIN_MANIFEST);
    let mut structure_errors = Vec::new();

    let manifest = if manifest_path.is_file() {
        let text = fs::read_to_string(&manifest_path).map_err(|source| LoadError::Io { path: manifest_path.clone(), source })?;
        match serde_json::from_str::<PluginManifest>(&text) {
            Ok(manifest) => Some(manifest),
            Err(error) => {
                structure_errors.push(PluginStructureError::InvalidDescriptor(format!("{PLUGIN_MANIFEST}: {error}")));
                None
            }
        }
    } else {
        structure_errors.push(PluginStructureError::InvalidDescriptor(format!("{PLUGIN_MANIFEST} is missing")));
        None
    };

    let info = match &manifest {
        Some(manifest) => PluginInfo {
            id: manifest.id.clone(),
            version: manifest.version.clone(),
            update_id: manifest.update_id.or(fallback.update_id),
        },
        None => fallback,
    };

    let classes_dir = root.join("classes");
    let classes = if classes_dir.is_dir() {
        match ClassIndex::load_directory(format!("plugin {info}"), &classes_dir) {
            Ok(classes) => classes,
            Err(error) => {
                structure_errors.push(PluginStructureError::InvalidDescriptor(error.to_string()));
                ClassIndex::new(format!("plugin {info}"))
            }
        }
    } else {
        ClassIndex::new(format!("plugin {info}"))
    };

    let mut details = PluginDetails::new(info, classes);
    if let Some(manifest) = manifest {
        details.dependencies = manifest.dependencies;
        details.dependent_classes = manifest.dependent_classes;
        details.components = manifest.components;
        details.non_dynamic_extensions = manifest.non_dynamic_extensions;
    }
    details.structure_errors = structure_errors;
    Ok(details)
}

/// Cache builder resolving plugins through `repository`
pub fn plugin_builder(repository: Arc<dyn ArtifactRepository>) -> impl Fn(&String) -> Result<PluginDescriptor, BuildError> + Send + Sync + 'static {
    move |id: &String| {
        let info = repository
            .fetch_metadata(id)
            .map_err(|error| BuildError::caused_by(format!("Failed to fetch metadata of plugin {id}"), error))?
            .ok_or_else(|| BuildError::NotFound(format!("Plugin {id} is not found in the repository")))?;
        let downloaded = repository
            .download(&info)
            .map_err(|error| BuildError::caused_by(format!("Failed to download plugin {id}"), error))?;
        PluginDescriptor::load(&info, downloaded.into()).map_err(|error| BuildError::caused_by(format!("Failed to read plugin {id}"), error))
    }
}

/// Cache builder resolving host builds by version through `repository`
pub fn host_builder(repository: Arc<dyn ArtifactRepository>) -> impl Fn(&String) -> Result<HostDescriptor, BuildError> + Send + Sync + 'static {
    move |version: &String| {
        let info = repository
            .fetch_metadata(version)
            .map_err(|error| BuildError::caused_by(format!("Failed to fetch host build {version}"), error))?
            .ok_or_else(|| BuildError::NotFound(format!("Host build {version} is not found in the repository")))?;
        let downloaded = repository
            .download(&info)
            .map_err(|error| BuildError::caused_by(format!("Failed to download host build {version}"), error))?;
        HostDescriptor::load(version, downloaded.into()).map_err(|error| BuildError::caused_by(format!("Failed to read host build {version}"), error))
    }
}

pub fn jdk_builder() -> impl Fn(&PathBuf) -> Result<JdkDescriptor, BuildError> + Send + Sync + 'static {
    |path: &PathBuf| match JdkDescriptor::load(path) {
        Ok(jdk) => Ok(jdk),
        Err(LoadError::MissingArtifact(path)) => Err(BuildError::NotFound(format!("JDK is not found at {}", path.display()))),
        Err(error) => Err(BuildError::caused_by(format!("Failed to read JDK at {}", path.display()), error)),
    }
}
