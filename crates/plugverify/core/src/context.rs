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

//! Per-run resolution state and finding accumulation

use indexmap::IndexSet;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::classes::{ClassDefinition, ClassIndex};
use crate::classes::descriptor::class_name_of_array_or_plain;
use crate::classpath::{ClassResolver, ExternalClassesFilter};
use crate::error::ResolutionError;
use crate::problems::{Location, Problem, Warning};

/// State of one plugin-against-target verification run.
///
/// Owned by a single thread for the whole run. Findings keep insertion order
/// but duplicates collapse.
pub struct VerificationContext<'a> {
    classpath: &'a dyn ClassResolver,
    plugin_classes: Option<&'a ClassIndex>,
    external_classes: ExternalClassesFilter,
    resolved: HashMap<String, Option<Arc<ClassDefinition>>>,
    problems: IndexSet<Problem>,
    warnings: IndexSet<Warning>,
    fatal: Option<ResolutionError>,
}

impl<'a> VerificationContext<'a> {
    pub fn new(classpath: &'a dyn ClassResolver) -> Self {
        Self {
            classpath,
            plugin_classes: None,
            external_classes: ExternalClassesFilter::default(),
            resolved: HashMap::new(),
            problems: IndexSet::new(),
            warnings: IndexSet::new(),
            fatal: None,
        }
    }

    pub fn with_external_classes(mut self, filter: ExternalClassesFilter) -> Self {
        self.external_classes = filter;
        self
    }

    /// Marks the classes that belong to the verified plugin
    pub fn with_plugin_classes(mut self, classes: &'a ClassIndex) -> Self {
        self.plugin_classes = Some(classes);
        self
    }

    pub fn is_plugin_class(&self, class_name: &str) -> bool {
        self.plugin_classes.is_some_and(|classes| classes.contains(class_name))
    }

    /// Resolves `class_name` or records a "class not found" problem at the
    /// supplied location.
    ///
    /// Array names resolve to their element class. Primitive arrays and
    /// classes covered by the external filter yield `None` without a problem.
    pub fn resolve_or_problem<F>(&mut self, class_name: &str, location: F) -> Option<Arc<ClassDefinition>>
    where
        F: FnOnce() -> Location,
    {
        let class_name = class_name_of_array_or_plain(class_name)?;
        match self.lookup(class_name) {
            Some(found) => Some(found),
            None => {
                if self.fatal.is_none() && !self.external_classes.is_external(class_name) {
                    self.register_problem(Problem::ClassNotFound {
                        class_name: class_name.to_string(),
                        location: location(),
                    });
                }
                None
            }
        }
    }

    /// Resolves a class without recording anything on a miss
    pub fn resolve(&mut self, class_name: &str) -> Option<Arc<ClassDefinition>> {
        let class_name = class_name_of_array_or_plain(class_name)?;
        self.lookup(class_name)
    }

    fn lookup(&mut self, class_name: &str) -> Option<Arc<ClassDefinition>> {
        if let Some(memoized) = self.resolved.get(class_name) {
            return memoized.clone();
        }
        if self.fatal.is_some() {
            return None;
        }

        match self.classpath.find_class(class_name) {
            Ok(found) => {
                self.resolved.insert(class_name.to_string(), found.clone());
                found
            }
            Err(err) => {
                warn!(class = class_name, error = %err, "Classpath became unavailable during resolution");
                self.fatal = Some(err);
                None
            }
        }
    }

    pub fn is_external(&self, class_name: &str) -> bool {
        self.external_classes.is_external(class_name)
    }

    pub fn register_problem(&mut self, problem: Problem) {
        if self.problems.insert(problem) {
            debug!(total = self.problems.len(), "Registered problem");
        }
    }

    pub fn register_warning(&mut self, warning: Warning) {
        self.warnings.insert(warning);
    }

    pub fn problems(&self) -> &IndexSet<Problem> {
        &self.problems
    }

    pub fn warnings(&self) -> &IndexSet<Warning> {
        &self.warnings
    }

    /// Error that made the classpath unusable, if any
    pub fn fatal_error(&self) -> Option<&ResolutionError> {
        self.fatal.as_ref()
    }

    pub fn take_fatal_error(&mut self) -> Option<ResolutionError> {
        self.fatal.take()
    }

    /// Number of distinct names looked up so far, hits and misses alike
    pub fn resolved_count(&self) -> usize {
        self.resolved.len()
    }

    pub fn classpath(&self) -> &'a dyn ClassResolver {
        self.classpath
    }

    pub fn into_findings(self) -> (IndexSet<Problem>, IndexSet<Warning>) {
        (self.problems, self.warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::{AccessFlags, ClassIndex};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        inner: ClassIndex,
        lookups: AtomicUsize,
    }

    impl ClassResolver for CountingResolver {
        fn find_class(&self, class_name: &str) -> Result<Option<Arc<ClassDefinition>>, ResolutionError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.find_class(class_name)
        }

        fn describe(&self) -> String {
            "counting".into()
        }
    }

    struct BrokenResolver;

    impl ClassResolver for BrokenResolver {
        fn find_class(&self, _class_name: &str) -> Result<Option<Arc<ClassDefinition>>, ResolutionError> {
            Err(ResolutionError::new("broken", "disk unplugged"))
        }

        fn describe(&self) -> String {
            "broken".into()
        }
    }

    fn counting(classes: &[&str]) -> CountingResolver {
        CountingResolver {
            inner: ClassIndex::from_definitions("test", classes.iter().map(|name| ClassDefinition::new(*name, AccessFlags::new(AccessFlags::PUBLIC)))),
            lookups: AtomicUsize::new(0),
        }
    }

    #[test]
    fn test_hits_and_misses_are_memoized() {
        let resolver = counting(&["h/A"]);
        let mut ctx = VerificationContext::new(&resolver);

        assert!(ctx.resolve_or_problem("h/A", || Location::class("p/X")).is_some());
        assert!(ctx.resolve_or_problem("h/A", || Location::class("p/Y")).is_some());
        assert!(ctx.resolve_or_problem("h/Missing", || Location::class("p/X")).is_none());
        assert!(ctx.resolve_or_problem("h/Missing", || Location::class("p/X")).is_none());
        assert!(ctx.resolve_or_problem("h/Missing", || Location::class("p/Y")).is_none());

        assert_eq!(resolver.lookups.load(Ordering::SeqCst), 2);
        assert_eq!(ctx.problems().len(), 2);
    }

    #[test]
    fn test_arrays_and_external_classes() {
        let resolver = counting(&["h/A"]);
        let mut ctx = VerificationContext::new(&resolver).with_external_classes(ExternalClassesFilter::new(["org.provided"]));

        assert!(ctx.resolve_or_problem("[[Lh/A;", || Location::class("p/X")).is_some());
        assert!(ctx.resolve_or_problem("[I", || Location::class("p/X")).is_none());
        assert!(ctx.resolve_or_problem("org/provided/Lib", || Location::class("p/X")).is_none());
        assert!(ctx.problems().is_empty());
    }

    #[test]
    fn test_fatal_error_is_sticky() {
        let mut ctx = VerificationContext::new(&BrokenResolver);

        assert!(ctx.resolve_or_problem("h/A", || Location::class("p/X")).is_none());
        assert!(ctx.problems().is_empty());
        assert_eq!(ctx.fatal_error().map(|e| e.reason.as_str()), Some("disk unplugged"));
    }
}
