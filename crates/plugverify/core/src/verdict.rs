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

//! Final classification of a verification run
//!
//! A verdict is built once from the findings of a run and never changes.
//! Problem and warning sets compare without regard to insertion order.

use indexmap::IndexSet;
use serde::Serialize;
use std::fmt;

use crate::dependencies::MissingDependency;
use crate::dynamic::DynamicPluginStatus;
use crate::engine::VerificationTarget;
use crate::plugin::{PluginInfo, PluginStructureError};
use crate::problems::{Problem, Warning};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Ok,
    Warnings {
        warnings: IndexSet<Warning>,
    },
    Problems {
        problems: IndexSet<Problem>,
        warnings: IndexSet<Warning>,
    },
    MissingDependencies {
        missing: Vec<MissingDependency>,
        problems: IndexSet<Problem>,
        warnings: IndexSet<Warning>,
    },
    /// The plugin package itself is broken
    Bad {
        errors: Vec<PluginStructureError>,
    },
    /// The plugin or the target could not be located
    NotFound {
        reason: String,
    },
    /// The plugin or the target could not be obtained
    FailedToDownload {
        reason: String,
    },
}

/// Discriminant of [`Verdict`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum VerdictKind {
    Ok,
    Warnings,
    Problems,
    MissingDependencies,
    Bad,
    NotFound,
    FailedToDownload,
}

impl VerdictKind {
    pub const ALL: [VerdictKind; 7] = [
        VerdictKind::Ok,
        VerdictKind::Warnings,
        VerdictKind::Problems,
        VerdictKind::MissingDependencies,
        VerdictKind::Bad,
        VerdictKind::NotFound,
        VerdictKind::FailedToDownload,
    ];

    /// Whether the run completed its checks
    pub fn is_verified(self) -> bool {
        match self {
            Self::Ok | Self::Warnings | Self::Problems | Self::MissingDependencies | Self::Bad => true,
            Self::NotFound | Self::FailedToDownload => false,
        }
    }
}

impl Verdict {
    /// Folds run findings into a verdict by precedence:
    /// structure errors, then mandatory missing dependencies, then problems,
    /// then warnings.
    ///
    /// `missing` holds the direct unresolved dependencies of the plugin; only
    /// mandatory ones affect the outcome, optional ones are carried along.
    pub fn from_findings(
        structure_errors: Vec<PluginStructureError>,
        missing: Vec<MissingDependency>,
        problems: IndexSet<Problem>,
        warnings: IndexSet<Warning>,
    ) -> Self {
        if !structure_errors.is_empty() {
            return Self::Bad { errors: structure_errors };
        }
        if missing.iter().any(|dependency| !dependency.is_optional()) {
            return Self::MissingDependencies { missing, problems, warnings };
        }
        if !problems.is_empty() {
            return Self::Problems { problems, warnings };
        }
        if !warnings.is_empty() {
            return Self::Warnings { warnings };
        }
        Self::Ok
    }

    pub fn kind(&self) -> VerdictKind {
        match self {
            Self::Ok => VerdictKind::Ok,
            Self::Warnings { .. } => VerdictKind::Warnings,
            Self::Problems { .. } => VerdictKind::Problems,
            Self::MissingDependencies { .. } => VerdictKind::MissingDependencies,
            Self::Bad { .. } => VerdictKind::Bad,
            Self::NotFound { .. } => VerdictKind::NotFound,
            Self::FailedToDownload { .. } => VerdictKind::FailedToDownload,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn problems(&self) -> Option<&IndexSet<Problem>> {
        match self {
            Self::Problems { problems, .. } | Self::MissingDependencies { problems, .. } => Some(problems),
            Self::Ok | Self::Warnings { .. } | Self::Bad { .. } | Self::NotFound { .. } | Self::FailedToDownload { .. } => None,
        }
    }

    pub fn warnings(&self) -> Option<&IndexSet<Warning>> {
        match self {
            Self::Warnings { warnings } | Self::Problems { warnings, .. } | Self::MissingDependencies { warnings, .. } => Some(warnings),
            Self::Ok | Self::Bad { .. } | Self::NotFound { .. } | Self::FailedToDownload { .. } => None,
        }
    }

    pub fn missing_dependencies(&self) -> &[MissingDependency] {
        match self {
            Self::MissingDependencies { missing, .. } => missing,
            Self::Ok | Self::Warnings { .. } | Self::Problems { .. } | Self::Bad { .. } | Self::NotFound { .. } | Self::FailedToDownload { .. } => &[],
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "Compatible"),
            Self::Warnings { warnings } => write!(f, "Compatible, {} warning(s)", warnings.len()),
            Self::Problems { problems, .. } => write!(f, "{} compatibility problem(s)", problems.len()),
            Self::MissingDependencies { missing, problems, .. } => {
                let mandatory = missing.iter().filter(|m| !m.is_optional()).count();
                write!(f, "{} missing mandatory dependency(ies) and {} compatibility problem(s)", mandatory, problems.len())
            }
            Self::Bad { errors } => write!(f, "Plugin is invalid: {} structure error(s)", errors.len()),
            Self::NotFound { reason } => write!(f, "Not found: {reason}"),
            Self::FailedToDownload { reason } => write!(f, "Failed to download: {reason}"),
        }
    }
}

/// Verdict of one plugin against one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub plugin: PluginInfo,
    pub target: VerificationTarget,
    pub verdict: Verdict,
    /// Known only when the plugin was loaded
    pub dynamic_status: Option<DynamicPluginStatus>,
}

impl VerificationResult {
    pub fn new(plugin: PluginInfo, target: VerificationTarget, verdict: Verdict) -> Self {
        Self {
            plugin,
            target,
            verdict,
            dynamic_status: None,
        }
    }

    pub fn with_dynamic_status(mut self, status: DynamicPluginStatus) -> Self {
        self.dynamic_status = Some(status);
        self
    }
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} against {}: {}", self.plugin, self.target, self.verdict)
    }
}
