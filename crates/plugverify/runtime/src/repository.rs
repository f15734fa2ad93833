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

//! Artifact sources for host builds and plugins

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::error::RepositoryError;

/// Metadata of one artifact known to a repository
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub id: String,
    pub version: String,
    pub update_id: Option<u64>,
    /// Repository specific location the artifact is downloaded from
    pub location: String,
}

/// Local copy of an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedArtifact {
    pub path: PathBuf,
    /// Whether the copy belongs to the caller and should be removed after use
    pub temporary: bool,
}

#[cfg_attr(test, mockall::automock)]
pub trait ArtifactRepository: Send + Sync {
    /// `Ok(None)` when the repository does not know `id`
    fn fetch_metadata(&self, id: &str) -> Result<Option<ArtifactInfo>, RepositoryError>;

    fn download(&self, info: &ArtifactInfo) -> Result<DownloadedArtifact, RepositoryError>;
}

#[derive(Debug, Default, Deserialize)]
struct ArtifactMetadata {
    version: Option<String>,
    update_id: Option<u64>,
}

/// Repository backed by a directory with one sub-directory per artifact
///
/// An optional `artifact.json` next to the artifact content carries its
/// version and update id. With a download directory configured every
/// download produces a private copy.
#[derive(Debug)]
pub struct LocalRepository {
    root: PathBuf,
    download_dir: Option<PathBuf>,
    downloads: AtomicU64,
}

impl LocalRepository {
    pub const METADATA_FILE: &'static str = "artifact.json";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            download_dir: None,
            downloads: AtomicU64::new(0),
        }
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_valid_id(id: &str) -> bool {
        !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\'])
    }
}

impl ArtifactRepository for LocalRepository {
    fn fetch_metadata(&self, id: &str) -> Result<Option<ArtifactInfo>, RepositoryError> {
        if !Self::is_valid_id(id) {
            return Ok(None);
        }
        let dir = self.root.join(id);
        if !dir.is_dir() {
            debug!(id, root = %self.root.display(), "Artifact not found");
            return Ok(None);
        }

        let metadata_path = dir.join(Self::METADATA_FILE);
        let metadata = if metadata_path.is_file() {
            let text = fs::read_to_string(&metadata_path).map_err(|source| RepositoryError::Io { path: metadata_path.clone(), source })?;
            serde_json::from_str(&text).map_err(|source| RepositoryError::Metadata { path: metadata_path, source })?
        } else {
            ArtifactMetadata::default()
        };

        Ok(Some(ArtifactInfo {
            id: id.to_string(),
            version: metadata.version.unwrap_or_else(|| "unknown".to_string()),
            update_id: metadata.update_id,
            location: dir.display().to_string(),
        }))
    }

    fn download(&self, info: &ArtifactInfo) -> Result<DownloadedArtifact, RepositoryError> {
        let source = PathBuf::from(&info.location);
        if !source.is_dir() {
            return Err(RepositoryError::Unavailable(format!("Artifact {} is no longer at {}", info.id, source.display())));
        }

        let Some(download_dir) = &self.download_dir else {
            return Ok(DownloadedArtifact { path: source, temporary: false });
        };
        let sequence = self.downloads.fetch_add(1, Ordering::Relaxed);
        let target = download_dir.join(format!("{}-{}-{}", info.id, info.version, sequence));
        copy_tree(&source, &target)?;
        debug!(id = %info.id, target = %target.display(), "Artifact copied");
        Ok(DownloadedArtifact { path: target, temporary: true })
    }
}

fn copy_tree(source: &Path, target: &Path) -> Result<(), RepositoryError> {
    let io = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| RepositoryError::Io { path, source }
    };

    let mut pending = vec![(source.to_path_buf(), target.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        fs::create_dir_all(&to).map_err(io(&to))?;
        for entry in fs::read_dir(&from).map_err(io(&from))? {
            let entry = entry.map_err(io(&from))?;
            let path = entry.path();
            let destination = to.join(entry.file_name());
            if path.is_dir() {
                pending.push((path, destination));
            } else {
                fs::copy(&path, &destination).map_err(io(&path))?;
            }
        }
    }
    Ok(())
}
