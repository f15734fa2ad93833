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

//! Findings registered during verification
//!
//! Problems and warnings are plain values compared by content. Registering the
//! same finding twice, whichever rule produced it, leaves a single entry.

use serde::Serialize;
use std::fmt;

use crate::classes::{AccessLevel, MemberReference, to_dotted};

/// A class used as the origin of a finding
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClassLocation {
    pub class_name: String,
}

impl ClassLocation {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self { class_name: class_name.into() }
    }
}

impl fmt::Display for ClassLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", to_dotted(&self.class_name))
    }
}

/// A method identified by owner, name and descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MethodLocation {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl MethodLocation {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

impl From<&MemberReference> for MethodLocation {
    fn from(reference: &MemberReference) -> Self {
        Self::new(reference.owner.clone(), reference.name.clone(), reference.descriptor.clone())
    }
}

impl fmt::Display for MethodLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", to_dotted(&self.owner), self.name, self.descriptor)
    }
}

/// A field identified by owner, name and descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FieldLocation {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl FieldLocation {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

impl From<&MemberReference> for FieldLocation {
    fn from(reference: &MemberReference) -> Self {
        Self::new(reference.owner.clone(), reference.name.clone(), reference.descriptor.clone())
    }
}

impl fmt::Display for FieldLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} : {}", to_dotted(&self.owner), self.name, self.descriptor)
    }
}

/// Place in the plugin where a finding was observed
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Location {
    Class(ClassLocation),
    Method(MethodLocation),
    Field(FieldLocation),
}

impl Location {
    pub fn class(class_name: impl Into<String>) -> Self {
        Self::Class(ClassLocation::new(class_name))
    }

    /// Class that hosts this location
    pub fn class_name(&self) -> &str {
        match self {
            Self::Class(class) => &class.class_name,
            Self::Method(method) => &method.owner,
            Self::Field(field) => &field.owner,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class(class) => write!(f, "class {class}"),
            Self::Method(method) => write!(f, "method {method}"),
            Self::Field(field) => write!(f, "field {field}"),
        }
    }
}

/// A binary incompatibility
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Problem {
    ClassNotFound { class_name: String, location: Location },
    SuperClassBecameInterface { class: ClassLocation, super_name: String },
    InterfaceBecameClass { class: ClassLocation, interface: String },
    FinalClassInherited { class: ClassLocation, final_class: String },
    MethodNotImplemented { class: ClassLocation, method: MethodLocation },
    MethodNotFound { method: MethodLocation, location: Location },
    FieldNotFound { field: FieldLocation, location: Location },
    IllegalMethodAccess { method: MethodLocation, access: AccessLevel, location: Location },
    IllegalFieldAccess { field: FieldLocation, access: AccessLevel, location: Location },
    OverridingFinalMethod { method: MethodLocation, location: MethodLocation },
}

impl Problem {
    /// Grouping key shared by problems of the same nature
    pub fn short_description(&self) -> String {
        match self {
            Self::ClassNotFound { class_name, .. } => format!("Access to unresolved class {}", to_dotted(class_name)),
            Self::SuperClassBecameInterface { super_name, .. } => {
                format!("Incompatible change of super class {} to interface", to_dotted(super_name))
            }
            Self::InterfaceBecameClass { interface, .. } => {
                format!("Incompatible change of interface {} to class", to_dotted(interface))
            }
            Self::FinalClassInherited { final_class, .. } => format!("Inheritance from a final class {}", to_dotted(final_class)),
            Self::MethodNotImplemented { method, .. } => format!("Abstract method {method} is not implemented"),
            Self::MethodNotFound { method, .. } => format!("Invocation of unresolved method {method}"),
            Self::FieldNotFound { field, .. } => format!("Access to unresolved field {field}"),
            Self::IllegalMethodAccess { method, access, .. } => format!("Illegal invocation of {access} method {method}"),
            Self::IllegalFieldAccess { field, access, .. } => format!("Illegal access to {access} field {field}"),
            Self::OverridingFinalMethod { method, .. } => format!("Overriding a final method {method}"),
        }
    }

    /// Complete human readable explanation
    pub fn full_description(&self) -> String {
        match self {
            Self::ClassNotFound { class_name, location } => {
                format!("{location} references an unresolved class {}", to_dotted(class_name))
            }
            Self::SuperClassBecameInterface { class, super_name } => format!(
                "Class {class} has a direct super class {} which was changed to an interface. This can lead to **IncompatibleClassChangeError** at runtime.",
                to_dotted(super_name)
            ),
            Self::InterfaceBecameClass { class, interface } => format!(
                "Class {class} implements {} which was changed from interface to class. This can lead to **IncompatibleClassChangeError** at runtime.",
                to_dotted(interface)
            ),
            Self::FinalClassInherited { class, final_class } => format!(
                "Class {class} inherits from a final class {}. This can lead to **VerifyError** at runtime.",
                to_dotted(final_class)
            ),
            Self::MethodNotImplemented { class, method } => format!(
                "Concrete class {class} inherits from {} but does not implement the abstract method {}{}. This can lead to **AbstractMethodError** at runtime.",
                to_dotted(&method.owner),
                method.name,
                method.descriptor
            ),
            Self::MethodNotFound { method, location } => {
                format!("{location} contains an invocation of an unresolved method {method}. This can lead to **NoSuchMethodError** at runtime.")
            }
            Self::FieldNotFound { field, location } => {
                format!("{location} references an unresolved field {field}. This can lead to **NoSuchFieldError** at runtime.")
            }
            Self::IllegalMethodAccess { method, access, location } => {
                format!("{location} invokes the {access} method {method}. This can lead to **IllegalAccessError** at runtime.")
            }
            Self::IllegalFieldAccess { field, access, location } => {
                format!("{location} accesses the {access} field {field}. This can lead to **IllegalAccessError** at runtime.")
            }
            Self::OverridingFinalMethod { method, location } => {
                format!("Method {location} overrides the final method {method}. This can lead to **VerifyError** at runtime.")
            }
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_description())
    }
}

/// A non-fatal advisory finding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// Use of a deprecated class, method or field of the host
    DeprecatedApiUsage { api: String, location: Location },
    /// An optional dependency could not be resolved
    OptionalDependencyNotResolved { dependency: String, reason: String },
    /// Non-fatal issue in the plugin package itself
    PluginStructure { message: String },
}

impl Warning {
    pub fn message(&self) -> String {
        match self {
            Self::DeprecatedApiUsage { api, location } => format!("Deprecated API {api} is used in {location}"),
            Self::OptionalDependencyNotResolved { dependency, reason } => {
                format!("Optional dependency {dependency} is not resolved: {reason}")
            }
            Self::PluginStructure { message } => message.clone(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_equal_content_collapses() {
        let a = Problem::ClassNotFound {
            class_name: "host/Gone".into(),
            location: Location::class("plugin/Main"),
        };
        let b = Problem::ClassNotFound {
            class_name: "host/Gone".into(),
            location: Location::class("plugin/Main"),
        };
        let set: HashSet<Problem> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_short_description_ignores_location() {
        let from_main = Problem::ClassNotFound {
            class_name: "host/Gone".into(),
            location: Location::class("plugin/Main"),
        };
        let from_util = Problem::ClassNotFound {
            class_name: "host/Gone".into(),
            location: Location::Method(MethodLocation::new("plugin/Util", "run", "()V")),
        };
        assert_ne!(from_main, from_util);
        assert_eq!(from_main.short_description(), from_util.short_description());
        assert!(from_util.full_description().contains("plugin.Util.run()V"));
    }

    #[test]
    fn test_problem_serializes_with_kind_tag() {
        let problem = Problem::SuperClassBecameInterface {
            class: ClassLocation::new("p/A"),
            super_name: "h/B".into(),
        };
        let json = serde_json::to_value(&problem).unwrap();
        assert_eq!(json["kind"], "super_class_became_interface");
        assert_eq!(json["super_name"], "h/B");
    }
}
