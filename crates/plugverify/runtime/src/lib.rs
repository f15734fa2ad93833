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

//! Plugin verification runtime
//!
//! Owns everything around a single verification run: descriptor caches,
//! repositories, the task scheduler and the services that feed it.

pub mod cache;
pub mod config;
pub mod descriptors;
pub mod error;
pub mod finder;
pub mod logging;
pub mod recheck;
pub mod repository;
pub mod scheduler;
pub mod server;
pub mod verify_task;

pub use cache::{BuildError, CacheError, CacheResult, CacheStatsSnapshot, Closeable, DescriptorCache, Handle};
pub use config::VerifierConfig;
pub use descriptors::{ExtractedArtifact, HostDescriptor, JdkDescriptor, PluginDescriptor};
pub use error::{ConfigError, LoadError, RepositoryError, TaskError, TaskResult};
pub use finder::HostDependencyFinder;
pub use recheck::{RecheckService, VerificationPlan};
pub use repository::{ArtifactInfo, ArtifactRepository, DownloadedArtifact, LocalRepository};
pub use scheduler::{CancellationToken, ProgressIndicator, ProgressSink, ResultSink, ServiceTask, TaskHandle, TaskId, TaskScheduler, TaskState};
pub use server::ServerContext;
pub use verify_task::{VerificationRequest, VerificationServices, VerifyPluginTask};
