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

//! Verification of one plugin against one target
//!
//! A run validates the plugin package, resolves its dependencies, composes the
//! classpath and walks every plugin class with its ancestors, running the
//! registered rules on each plugin class reached. The engine holds no per-run
//! state and can be shared between threads.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info};

use crate::classpath::{ClassOrigin, ClassResolver, CompositeResolver, ExternalClassesFilter};
use crate::context::VerificationContext;
use crate::dependencies::{DependenciesGraph, DependencyFinder};
use crate::dynamic::DynamicPluginStatus;
use crate::error::VerificationError;
use crate::plugin::{PluginDetails, StructureValidator};
use crate::problems::Warning;
use crate::rules::RuleRegistry;
use crate::verdict::{VerificationResult, Verdict};
use crate::walker::ClassGraphWalker;

/// Host build and JDK a plugin is checked against
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerificationTarget {
    pub host_version: String,
    pub jdk: String,
}

impl VerificationTarget {
    pub fn new(host_version: impl Into<String>, jdk: impl Into<String>) -> Self {
        Self {
            host_version: host_version.into(),
            jdk: jdk.into(),
        }
    }
}

impl fmt::Display for VerificationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host {} (JDK {})", self.host_version, self.jdk)
    }
}

/// Everything one run needs, borrowed for its duration
pub struct VerificationInput<'a> {
    pub plugin: &'a PluginDetails,
    pub target: VerificationTarget,
    pub host: &'a dyn ClassResolver,
    pub jdk: &'a dyn ClassResolver,
    pub dependency_finder: &'a dyn DependencyFinder,
}

pub struct VerificationEngine {
    rules: RuleRegistry,
    structure: StructureValidator,
    external_classes: ExternalClassesFilter,
}

impl VerificationEngine {
    /// Creates an engine with the builtin rules and structure checks
    pub fn new() -> Self {
        Self {
            rules: RuleRegistry::with_default_rules(),
            structure: StructureValidator::new(),
            external_classes: ExternalClassesFilter::default(),
        }
    }

    pub fn with_rules(mut self, rules: RuleRegistry) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_structure_validator(mut self, structure: StructureValidator) -> Self {
        self.structure = structure;
        self
    }

    pub fn with_external_classes(mut self, filter: ExternalClassesFilter) -> Self {
        self.external_classes = filter;
        self
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    pub fn verify(&self, input: &VerificationInput<'_>) -> Result<VerificationResult, VerificationError> {
        self.verify_with(input, &mut |_| {}, &|| false)
    }

    /// Runs a verification, reporting the fraction of checked classes and
    /// polling `should_stop` between classes.
    pub fn verify_with(&self, input: &VerificationInput<'_>, progress: &mut dyn FnMut(f64), should_stop: &dyn Fn() -> bool) -> Result<VerificationResult, VerificationError> {
        let plugin = input.plugin;
        let dynamic_status = DynamicPluginStatus::of(plugin);
        info!(plugin = %plugin.info, target = %input.target, "Verifying plugin");

        let structure = self.structure.validate(plugin);
        if !structure.is_valid() {
            info!(plugin = %plugin.info, errors = structure.errors.len(), "Plugin structure is invalid");
            let verdict = Verdict::Bad { errors: structure.errors };
            progress(1.0);
            return Ok(VerificationResult::new(plugin.info.clone(), input.target.clone(), verdict).with_dynamic_status(dynamic_status));
        }

        let dependencies = DependenciesGraph::build(plugin, input.dependency_finder);
        // Interrupted dependency lookups surface as missing dependencies
        if should_stop() {
            info!(plugin = %plugin.info, "Verification interrupted while resolving dependencies");
            return Err(VerificationError::Interrupted);
        }
        let direct_missing: Vec<_> = dependencies.direct_missing().cloned().collect();
        let excluded: HashSet<&str> = direct_missing
            .iter()
            .filter_map(|missing| plugin.dependent_classes.get(&missing.dependency.id))
            .flatten()
            .map(String::as_str)
            .collect();
        if !excluded.is_empty() {
            debug!(plugin = %plugin.info, classes = excluded.len(), "Skipping classes of unresolved dependencies");
        }

        let mut classpath = CompositeResolver::new().with_layer(ClassOrigin::Plugin, &plugin.classes);
        for resolved in dependencies.resolved() {
            classpath.push(ClassOrigin::Dependency(resolved.id().to_string()), &resolved.details.classes);
        }
        let classpath = classpath.with_layer(ClassOrigin::Host, input.host).with_layer(ClassOrigin::Jdk, input.jdk);

        let mut ctx = VerificationContext::new(&classpath)
            .with_plugin_classes(&plugin.classes)
            .with_external_classes(self.external_classes.clone());
        for warning in structure.warnings {
            ctx.register_warning(Warning::PluginStructure { message: warning });
        }
        for missing in direct_missing.iter().filter(|missing| missing.is_optional()) {
            ctx.register_warning(Warning::OptionalDependencyNotResolved {
                dependency: missing.dependency.id.clone(),
                reason: missing.reason.clone(),
            });
        }

        let class_names: Vec<&str> = plugin.classes.sorted_class_names().into_iter().filter(|name| !excluded.contains(name)).collect();
        let total = class_names.len().max(1) as f64;
        let mut walker = ClassGraphWalker::new(true);

        for (checked, name) in class_names.iter().enumerate() {
            if should_stop() {
                info!(plugin = %plugin.info, "Verification interrupted");
                return Err(VerificationError::Interrupted);
            }
            let Some(class) = plugin.classes.get(name) else {
                continue;
            };

            walker.walk(&mut ctx, class, true, |visited, ctx| {
                if ctx.is_plugin_class(&visited.name) && !excluded.contains(visited.name.as_str()) {
                    self.rules.run_class_rules(visited, ctx);
                    self.rules.run_member_rules(visited, ctx);
                }
                true
            });

            if let Some(error) = ctx.take_fatal_error() {
                return Err(VerificationError::ClasspathUnavailable(error));
            }
            progress((checked + 1) as f64 / total);
        }

        if should_stop() {
            info!(plugin = %plugin.info, "Verification interrupted");
            return Err(VerificationError::Interrupted);
        }
        let (problems, warnings) = ctx.into_findings();
        let verdict = Verdict::from_findings(Vec::new(), direct_missing, problems, warnings);
        info!(plugin = %plugin.info, target = %input.target, verdict = %verdict, "Verification finished");
        progress(1.0);

        Ok(VerificationResult::new(plugin.info.clone(), input.target.clone(), verdict).with_dynamic_status(dynamic_status))
    }
}

impl Default for VerificationEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::{AccessFlags, ClassDefinition, ClassIndex};
    use crate::dependencies::NoDependencies;
    use crate::error::ResolutionError;
    use crate::plugin::{PluginDependency, PluginInfo, PluginStructureError};
    use crate::problems::Problem;
    use crate::verdict::VerdictKind;
    use crate::walker::JAVA_LANG_OBJECT;
    use crate::dependencies::{DependencyFinder, DependencyResolution};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn jdk() -> ClassIndex {
        ClassIndex::from_definitions("jdk", [ClassDefinition::new(JAVA_LANG_OBJECT, AccessFlags::new(AccessFlags::PUBLIC))])
    }

    fn host() -> ClassIndex {
        ClassIndex::from_definitions("host", [ClassDefinition::new("h/Api", AccessFlags::new(AccessFlags::PUBLIC)).with_super(JAVA_LANG_OBJECT)])
    }

    fn input<'a>(plugin: &'a PluginDetails, host: &'a dyn ClassResolver, jdk: &'a dyn ClassResolver) -> VerificationInput<'a> {
        VerificationInput {
            plugin,
            target: VerificationTarget::new("241.1", "17"),
            host,
            jdk,
            dependency_finder: &NoDependencies,
        }
    }

    #[test]
    fn test_compatible_plugin() {
        let plugin = PluginDetails::from_classes(PluginInfo::new("p", "1.0"), [ClassDefinition::new("p/A", AccessFlags::new(AccessFlags::PUBLIC)).with_super("h/Api")]);
        let (host, jdk) = (host(), jdk());
        let mut reported = Vec::new();

        let result = VerificationEngine::new().verify_with(&input(&plugin, &host, &jdk), &mut |p| reported.push(p), &|| false).unwrap();

        assert_eq!(result.verdict, Verdict::Ok);
        assert_eq!(result.dynamic_status, Some(DynamicPluginStatus::MaybeDynamic));
        assert_eq!(reported.last(), Some(&1.0));
        assert!(reported.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_structure_errors_short_circuit() {
        let plugin = PluginDetails::from_classes(PluginInfo::new("", "1.0"), [ClassDefinition::new("p/A", AccessFlags::new(AccessFlags::PUBLIC)).with_super("h/Gone")]);
        let (host, jdk) = (host(), jdk());

        let result = VerificationEngine::new().verify(&input(&plugin, &host, &jdk)).unwrap();

        assert_eq!(result.verdict, Verdict::Bad { errors: vec![PluginStructureError::MissingId] });
    }

    #[test]
    fn test_classes_of_missing_dependency_are_skipped() {
        let plugin = PluginDetails::from_classes(
            PluginInfo::new("p", "1.0"),
            [
                ClassDefinition::new("p/Core", AccessFlags::new(AccessFlags::PUBLIC)).with_super("h/Api"),
                ClassDefinition::new("p/lang/Support", AccessFlags::new(AccessFlags::PUBLIC)).with_super("lang/Base"),
            ],
        )
        .with_dependency(PluginDependency::optional("com.lang"))
        .with_dependent_classes("com.lang", ["p/lang/Support"]);
        let (host, jdk) = (host(), jdk());

        let result = VerificationEngine::new().verify(&input(&plugin, &host, &jdk)).unwrap();

        assert_eq!(result.verdict.kind(), VerdictKind::Warnings);
        assert!(matches!(
            result.verdict.warnings().and_then(|w| w.first()),
            Some(Warning::OptionalDependencyNotResolved { dependency, .. }) if dependency == "com.lang"
        ));
    }

    #[test]
    fn test_stop_request_interrupts() {
        let plugin = PluginDetails::from_classes(PluginInfo::new("p", "1.0"), [ClassDefinition::new("p/A", AccessFlags::new(AccessFlags::PUBLIC))]);
        let (host, jdk) = (host(), jdk());

        let err = VerificationEngine::new().verify_with(&input(&plugin, &host, &jdk), &mut |_| {}, &|| true).unwrap_err();

        assert_eq!(err, VerificationError::Interrupted);
    }

    /// Raises the stop flag as a cancelled cache wait would, then reports the dependency missing
    struct InterruptingFinder<'a>(&'a AtomicBool);

    impl DependencyFinder for InterruptingFinder<'_> {
        fn find(&self, _dependency: &PluginDependency) -> DependencyResolution {
            self.0.store(true, Ordering::SeqCst);
            DependencyResolution::NotFound("Dependency resolution was interrupted".into())
        }
    }

    #[test]
    fn test_stop_during_dependency_resolution_interrupts() {
        let plugin = PluginDetails::from_classes(
            PluginInfo::new("p", "1.0"),
            [ClassDefinition::new("p/lang/Support", AccessFlags::new(AccessFlags::PUBLIC)).with_super(JAVA_LANG_OBJECT)],
        )
        .with_dependency(PluginDependency::mandatory("com.lang"))
        .with_dependent_classes("com.lang", ["p/lang/Support"]);
        let (host, jdk) = (host(), jdk());
        let stop = AtomicBool::new(false);
        let finder = InterruptingFinder(&stop);
        let input = VerificationInput {
            dependency_finder: &finder,
            ..input(&plugin, &host, &jdk)
        };

        let result = VerificationEngine::new().verify_with(&input, &mut |_| {}, &|| stop.load(Ordering::SeqCst));

        assert_eq!(result, Err(VerificationError::Interrupted));
    }

    struct UnavailableHost;

    impl ClassResolver for UnavailableHost {
        fn find_class(&self, _class_name: &str) -> Result<Option<Arc<ClassDefinition>>, ResolutionError> {
            Err(ResolutionError::new("host 241.1", "index file deleted"))
        }

        fn describe(&self) -> String {
            "host 241.1".into()
        }
    }

    #[test]
    fn test_unavailable_classpath_aborts() {
        let plugin = PluginDetails::from_classes(PluginInfo::new("p", "1.0"), [ClassDefinition::new("p/A", AccessFlags::new(AccessFlags::PUBLIC)).with_super("h/Api")]);
        let jdk = jdk();

        let err = VerificationEngine::new().verify(&input(&plugin, &UnavailableHost, &jdk)).unwrap_err();

        assert!(matches!(err, VerificationError::ClasspathUnavailable(ResolutionError { ref reason, .. }) if reason == "index file deleted"));
    }

    #[test]
    fn test_unresolved_reference_is_a_problem() {
        let plugin = PluginDetails::from_classes(
            PluginInfo::new("p", "1.0"),
            [ClassDefinition::new("p/A", AccessFlags::new(AccessFlags::PUBLIC)).with_super(JAVA_LANG_OBJECT).with_class_reference("h/Z")],
        );
        let (host, jdk) = (host(), jdk());

        let result = VerificationEngine::new().verify(&input(&plugin, &host, &jdk)).unwrap();

        let problems: Vec<&Problem> = result.verdict.problems().map(|p| p.iter().collect()).unwrap_or_default();
        assert_eq!(problems.len(), 1);
        assert!(matches!(problems[0], Problem::ClassNotFound { class_name, .. } if class_name == "h/Z"));
    }
}
