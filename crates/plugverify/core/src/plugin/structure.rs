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

//! Structural validation of plugin packages
//!
//! Runs a set of named rules over [`PluginDetails`] before any class is
//! checked. Errors make the plugin `Bad`; warnings are carried into the verdict.

use indexmap::IndexMap;
use std::collections::HashSet;

use crate::plugin::{PluginDetails, PluginStructureError};

/// Aggregated outcome of structure rules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructureReport {
    pub errors: Vec<PluginStructureError>,
    pub warnings: Vec<String>,
}

impl StructureReport {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn failure(error: PluginStructureError) -> Self {
        Self {
            errors: vec![error],
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Merges another report into this one
    pub fn combine(&mut self, other: StructureReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// A named check over a plugin package
pub trait StructureRule: Send + Sync {
    fn check(&self, plugin: &PluginDetails) -> StructureReport;

    /// Machine-readable rule identifier
    fn name(&self) -> &str;
}

pub struct IdPresentRule;

impl StructureRule for IdPresentRule {
    fn check(&self, plugin: &PluginDetails) -> StructureReport {
        if plugin.info.id.trim().is_empty() {
            StructureReport::failure(PluginStructureError::MissingId)
        } else {
            StructureReport::success()
        }
    }

    fn name(&self) -> &str {
        "id_present"
    }
}

pub struct VersionPresentRule;

impl StructureRule for VersionPresentRule {
    fn check(&self, plugin: &PluginDetails) -> StructureReport {
        if plugin.info.version.trim().is_empty() {
            StructureReport::failure(PluginStructureError::MissingVersion)
        } else {
            StructureReport::success()
        }
    }

    fn name(&self) -> &str {
        "version_present"
    }
}

/// Class names must be non-empty internal names
pub struct ClassNamesRule;

impl ClassNamesRule {
    fn is_well_formed(name: &str) -> bool {
        !name.is_empty() && !name.contains('.') && !name.contains(';') && !name.contains('[') && name.split('/').all(|segment| !segment.is_empty())
    }
}

impl StructureRule for ClassNamesRule {
    fn check(&self, plugin: &PluginDetails) -> StructureReport {
        let mut invalid: Vec<&str> = plugin.classes.class_names().filter(|name| !Self::is_well_formed(name)).collect();
        invalid.sort_unstable();
        StructureReport {
            errors: invalid.into_iter().map(|name| PluginStructureError::InvalidClassName(name.to_string())).collect(),
            warnings: Vec::new(),
        }
    }

    fn name(&self) -> &str {
        "class_names"
    }
}

pub struct NoSelfDependencyRule;

impl StructureRule for NoSelfDependencyRule {
    fn check(&self, plugin: &PluginDetails) -> StructureReport {
        if plugin.dependencies.iter().any(|dependency| dependency.id == plugin.info.id) {
            StructureReport::failure(PluginStructureError::SelfDependency)
        } else {
            StructureReport::success()
        }
    }

    fn name(&self) -> &str {
        "no_self_dependency"
    }
}

/// Declaring the same dependency twice is tolerated but reported
pub struct NoDuplicateDependencyRule;

impl StructureRule for NoDuplicateDependencyRule {
    fn check(&self, plugin: &PluginDetails) -> StructureReport {
        let mut seen = HashSet::new();
        let mut report = StructureReport::success();
        for dependency in &plugin.dependencies {
            if !seen.insert(dependency.id.as_str()) {
                report = report.with_warning(format!("Dependency {} is declared more than once", dependency.id));
            }
        }
        report
    }

    fn name(&self) -> &str {
        "no_duplicate_dependency"
    }
}

/// Applies every registered structure rule to a plugin
pub struct StructureValidator {
    rules: IndexMap<String, Box<dyn StructureRule>>,
}

impl StructureValidator {
    /// Creates a validator with the default rules:
    /// - id present
    /// - version present
    /// - well-formed class names
    /// - no self dependency
    /// - no duplicate dependency
    pub fn new() -> Self {
        let mut validator = Self { rules: IndexMap::new() };

        validator.add_rule(Box::new(IdPresentRule));
        validator.add_rule(Box::new(VersionPresentRule));
        validator.add_rule(Box::new(ClassNamesRule));
        validator.add_rule(Box::new(NoSelfDependencyRule));
        validator.add_rule(Box::new(NoDuplicateDependencyRule));

        validator
    }

    pub fn add_rule(&mut self, rule: Box<dyn StructureRule>) {
        self.rules.insert(rule.name().to_string(), rule);
    }

    pub fn remove_rule(&mut self, rule_name: &str) {
        self.rules.shift_remove(rule_name);
    }

    pub fn has_rule(&self, rule_name: &str) -> bool {
        self.rules.contains_key(rule_name)
    }

    /// Validates a plugin, including issues the loader already reported
    pub fn validate(&self, plugin: &PluginDetails) -> StructureReport {
        let mut report = StructureReport {
            errors: plugin.structure_errors.clone(),
            warnings: plugin.structure_warnings.clone(),
        };
        for rule in self.rules.values() {
            report.combine(rule.check(plugin));
        }
        report
    }
}

impl Default for StructureValidator {
    fn default() -> Self {
        Self::new()
    }
}
