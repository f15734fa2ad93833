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

//! Plugin model
//!
//! [`PluginDetails`] is what a loader produces from a plugin package: identity,
//! classes, declared dependencies and any structural issue found while reading.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::classes::{ClassDefinition, ClassIndex};

pub mod structure;

pub use structure::{StructureReport, StructureRule, StructureValidator};

/// Identity of a plugin version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginInfo {
    pub id: String,
    pub version: String,
    /// Repository-assigned sequence number; newer uploads have larger ids
    #[serde(default)]
    pub update_id: Option<u64>,
}

impl PluginInfo {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            update_id: None,
        }
    }

    pub fn with_update_id(mut self, update_id: u64) -> Self {
        self.update_id = Some(update_id);
        self
    }

    /// Placeholder for a plugin whose package could not be obtained
    pub fn unresolved(id: impl Into<String>) -> Self {
        Self::new(id, "unknown")
    }
}

impl fmt::Display for PluginInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.version)
    }
}

/// Dependency declared by a plugin on another plugin or host module
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginDependency {
    pub id: String,
    #[serde(default)]
    pub optional: bool,
}

impl PluginDependency {
    pub fn mandatory(id: impl Into<String>) -> Self {
        Self { id: id.into(), optional: false }
    }

    pub fn optional(id: impl Into<String>) -> Self {
        Self { id: id.into(), optional: true }
    }
}

impl fmt::Display for PluginDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.optional { write!(f, "{} (optional)", self.id) } else { write!(f, "{}", self.id) }
    }
}

/// Structural defect of a plugin package; any of these makes the plugin `Bad`
#[derive(Debug, Error, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum PluginStructureError {
    #[error("Plugin id is not specified")]
    MissingId,

    #[error("Plugin version is not specified")]
    MissingVersion,

    #[error("Class name {0} is malformed")]
    InvalidClassName(String),

    #[error("Plugin declares a dependency on itself")]
    SelfDependency,

    #[error("Plugin descriptor is invalid: {0}")]
    InvalidDescriptor(String),
}

/// Everything the engine needs to know about a plugin
#[derive(Debug, Clone)]
pub struct PluginDetails {
    pub info: PluginInfo,
    pub classes: ClassIndex,
    pub dependencies: Vec<PluginDependency>,
    /// Classes loaded only when the keyed dependency is present
    pub dependent_classes: HashMap<String, Vec<String>>,
    /// Legacy components declared by the plugin
    pub components: Vec<String>,
    /// Extension points used by the plugin that cannot be loaded dynamically
    pub non_dynamic_extensions: Vec<String>,
    /// Problems reported by the loader itself
    pub structure_errors: Vec<PluginStructureError>,
    pub structure_warnings: Vec<String>,
}

impl PluginDetails {
    pub fn new(info: PluginInfo, classes: ClassIndex) -> Self {
        Self {
            info,
            classes,
            dependencies: Vec::new(),
            dependent_classes: HashMap::new(),
            components: Vec::new(),
            non_dynamic_extensions: Vec::new(),
            structure_errors: Vec::new(),
            structure_warnings: Vec::new(),
        }
    }

    /// Convenience constructor for in-memory plugins
    pub fn from_classes(info: PluginInfo, classes: impl IntoIterator<Item = ClassDefinition>) -> Self {
        let index = ClassIndex::from_definitions(format!("plugin {info}"), classes);
        Self::new(info, index)
    }

    pub fn with_dependency(mut self, dependency: PluginDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_dependent_classes(mut self, dependency_id: impl Into<String>, classes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependent_classes
            .entry(dependency_id.into())
            .or_default()
            .extend(classes.into_iter().map(Into::into));
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.components.push(component.into());
        self
    }

    pub fn with_non_dynamic_extension(mut self, extension_point: impl Into<String>) -> Self {
        self.non_dynamic_extensions.push(extension_point.into());
        self
    }

    pub fn with_structure_error(mut self, error: PluginStructureError) -> Self {
        self.structure_errors.push(error);
        self
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_display() {
        assert_eq!(PluginDependency::mandatory("com.a").to_string(), "com.a");
        assert_eq!(PluginDependency::optional("com.b").to_string(), "com.b (optional)");
    }

    #[test]
    fn test_dependent_classes_accumulate() {
        let details = PluginDetails::from_classes(PluginInfo::new("p", "1.0"), [])
            .with_dependent_classes("com.lang", ["p/lang/A"])
            .with_dependent_classes("com.lang", ["p/lang/B"]);
        assert_eq!(details.dependent_classes["com.lang"], vec!["p/lang/A", "p/lang/B"]);
        assert_eq!(details.classes.name(), "plugin p:1.0");
    }
}
