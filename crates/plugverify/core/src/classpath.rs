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

//! Classpath composition
//!
//! A verification run looks classes up through layered resolvers: the plugin
//! itself, then its resolved dependencies, then the host build, then the JDK.
//! The first layer that knows a class wins, so bundled copies of libraries
//! inside a plugin shadow the host's versions.

use std::fmt;
use std::sync::Arc;

use crate::classes::ClassDefinition;
use crate::error::ResolutionError;

/// Capability of turning a class name into its definition
pub trait ClassResolver: Send + Sync {
    /// Looks up a class by internal name.
    ///
    /// `Ok(None)` is an ordinary miss. `Err` means the classpath itself cannot
    /// be consulted any more.
    fn find_class(&self, class_name: &str) -> Result<Option<Arc<ClassDefinition>>, ResolutionError>;

    /// Human readable identity of this classpath
    fn describe(&self) -> String;
}

impl<T: ClassResolver + ?Sized> ClassResolver for Arc<T> {
    fn find_class(&self, class_name: &str) -> Result<Option<Arc<ClassDefinition>>, ResolutionError> {
        (**self).find_class(class_name)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Where a resolved class came from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClassOrigin {
    Plugin,
    Dependency(String),
    Host,
    Jdk,
}

impl fmt::Display for ClassOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plugin => write!(f, "plugin"),
            Self::Dependency(id) => write!(f, "dependency {id}"),
            Self::Host => write!(f, "host"),
            Self::Jdk => write!(f, "jdk"),
        }
    }
}

struct Layer<'a> {
    origin: ClassOrigin,
    resolver: &'a dyn ClassResolver,
}

/// Ordered, first-match-wins combination of resolvers
#[derive(Default)]
pub struct CompositeResolver<'a> {
    layers: Vec<Layer<'a>>,
}

impl<'a> CompositeResolver<'a> {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Appends a layer with lower precedence than every existing one
    pub fn push(&mut self, origin: ClassOrigin, resolver: &'a dyn ClassResolver) {
        self.layers.push(Layer { origin, resolver });
    }

    pub fn with_layer(mut self, origin: ClassOrigin, resolver: &'a dyn ClassResolver) -> Self {
        self.push(origin, resolver);
        self
    }

    /// Resolves a class and reports which layer supplied it
    pub fn find_with_origin(&self, class_name: &str) -> Result<Option<(Arc<ClassDefinition>, ClassOrigin)>, ResolutionError> {
        for layer in &self.layers {
            if let Some(found) = layer.resolver.find_class(class_name)? {
                return Ok(Some((found, layer.origin.clone())));
            }
        }
        Ok(None)
    }

    pub fn origins(&self) -> impl Iterator<Item = &ClassOrigin> {
        self.layers.iter().map(|layer| &layer.origin)
    }
}

impl ClassResolver for CompositeResolver<'_> {
    fn find_class(&self, class_name: &str) -> Result<Option<Arc<ClassDefinition>>, ResolutionError> {
        Ok(self.find_with_origin(class_name)?.map(|(found, _)| found))
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self.layers.iter().map(|layer| format!("{} ({})", layer.resolver.describe(), layer.origin)).collect();
        parts.join(" -> ")
    }
}

/// Package prefixes whose classes are provided by the runtime environment.
///
/// Unresolved classes inside these packages are not reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalClassesFilter {
    prefixes: Vec<String>,
}

impl ExternalClassesFilter {
    /// Accepts prefixes in dotted (`com.example`) or internal (`com/example`) form
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prefixes = prefixes
            .into_iter()
            .map(|p| p.as_ref().trim().replace('.', "/").trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .collect();
        Self { prefixes }
    }

    pub fn is_external(&self, class_name: &str) -> bool {
        self.prefixes.iter().any(|prefix| {
            class_name
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::{AccessFlags, ClassIndex};

    fn class(name: &str, access: u16) -> ClassDefinition {
        ClassDefinition::new(name, AccessFlags::new(access))
    }

    #[test]
    fn test_first_layer_wins() {
        let plugin = ClassIndex::from_definitions("plugin", [class("lib/Util", AccessFlags::PUBLIC | AccessFlags::FINAL)]);
        let host = ClassIndex::from_definitions("host", [class("lib/Util", AccessFlags::PUBLIC), class("host/Api", AccessFlags::PUBLIC)]);
        let resolver = CompositeResolver::new().with_layer(ClassOrigin::Plugin, &plugin).with_layer(ClassOrigin::Host, &host);

        let (util, origin) = resolver.find_with_origin("lib/Util").unwrap().unwrap();
        assert_eq!(origin, ClassOrigin::Plugin);
        assert!(util.is_final());

        let (_, origin) = resolver.find_with_origin("host/Api").unwrap().unwrap();
        assert_eq!(origin, ClassOrigin::Host);
        assert!(resolver.find_class("nowhere/X").unwrap().is_none());
    }

    #[test]
    fn test_external_filter_matches_whole_packages() {
        let filter = ExternalClassesFilter::new(["org.apache.commons", "kotlin/"]);
        assert!(filter.is_external("org/apache/commons/lang/StringUtils"));
        assert!(filter.is_external("kotlin/Unit"));
        assert!(!filter.is_external("org/apache/commonsx/Foo"));
        assert!(!filter.is_external("com/example/Foo"));
    }
}
