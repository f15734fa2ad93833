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

//! Binary compatibility verification of plugins against a host API surface.
//!
//! The engine never executes plugin code. It reads compiled classes, resolves
//! them against a composed classpath (plugin, dependencies, host, JDK) and runs
//! structural rules that register problems and warnings into a per-run context.
//! The findings are folded into a single [`Verdict`].

pub mod classes;
pub mod classpath;
pub mod context;
pub mod dependencies;
pub mod dynamic;
pub mod engine;
pub mod error;
pub mod plugin;
pub mod problems;
pub mod report;
pub mod rules;
pub mod verdict;
pub mod walker;

// Public exports
pub use classes::{AccessFlags, AccessLevel, ClassDefinition, ClassIndex, FieldInfo, MemberKind, MemberReference, MethodInfo};
pub use classpath::{ClassOrigin, ClassResolver, CompositeResolver, ExternalClassesFilter};
pub use context::VerificationContext;
pub use dependencies::{DependenciesGraph, DependencyFinder, DependencyResolution, MissingDependency, ResolvedDependency};
pub use dynamic::DynamicPluginStatus;
pub use engine::{VerificationEngine, VerificationInput, VerificationTarget};
pub use error::{ClassFileError, ResolutionError, VerificationError};
pub use plugin::{PluginDependency, PluginDetails, PluginInfo, PluginStructureError};
pub use problems::{ClassLocation, FieldLocation, Location, MethodLocation, Problem, Warning};
pub use report::{PrinterOptions, WriterPrinter};
pub use rules::{RuleId, RuleRegistry};
pub use verdict::{VerificationResult, Verdict, VerdictKind};
pub use walker::{ClassGraphWalker, JAVA_LANG_OBJECT, WalkOutcome};
