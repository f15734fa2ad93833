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

//! Pluggable compatibility rules
//!
//! A rule is a plain function over one subject (a class, a method or a field)
//! and the active [`VerificationContext`]. Its only side effect is registering
//! problems and warnings. Rules are keyed by [`RuleId`] in a [`RuleRegistry`]
//! assembled at startup.

use indexmap::IndexMap;
use std::borrow::Cow;
use std::fmt;

use crate::classes::{ClassDefinition, FieldInfo, MethodInfo};
use crate::context::VerificationContext;

pub mod abstract_methods;
pub mod deprecation;
pub mod hierarchy;
pub(crate) mod lookup;
pub mod members;
pub mod references;

/// Identity of a rule inside a registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(Cow<'static, str>);

impl RuleId {
    pub const SUPERCLASS_BECAME_INTERFACE: RuleId = RuleId::builtin("superclass-became-interface");
    pub const INTERFACE_BECAME_CLASS: RuleId = RuleId::builtin("interface-became-class");
    pub const FINAL_CLASS_INHERITED: RuleId = RuleId::builtin("final-class-inherited");
    pub const ABSTRACT_METHOD_NOT_IMPLEMENTED: RuleId = RuleId::builtin("abstract-method-not-implemented");
    pub const REFERENCED_CLASSES_RESOLVED: RuleId = RuleId::builtin("referenced-classes-resolved");
    pub const MEMBER_REFERENCES: RuleId = RuleId::builtin("member-references");
    pub const DEPRECATED_API_USAGE: RuleId = RuleId::builtin("deprecated-api-usage");
    pub const OVERRIDING_FINAL_METHOD: RuleId = RuleId::builtin("overriding-final-method");
    pub const METHOD_SIGNATURE_TYPES_RESOLVED: RuleId = RuleId::builtin("method-signature-types-resolved");
    pub const FIELD_TYPE_RESOLVED: RuleId = RuleId::builtin("field-type-resolved");

    const fn builtin(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rule inspecting a whole class
pub type ClassRule = Box<dyn Fn(&ClassDefinition, &mut VerificationContext<'_>) + Send + Sync>;
/// Rule inspecting one declared method
pub type MethodRule = Box<dyn Fn(&ClassDefinition, &MethodInfo, &mut VerificationContext<'_>) + Send + Sync>;
/// Rule inspecting one declared field
pub type FieldRule = Box<dyn Fn(&ClassDefinition, &FieldInfo, &mut VerificationContext<'_>) + Send + Sync>;

enum Rule {
    Class(ClassRule),
    Method(MethodRule),
    Field(FieldRule),
}

/// Subject kind a rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Class,
    Method,
    Field,
}

/// Ordered set of rules; registration order is execution order
#[derive(Default)]
pub struct RuleRegistry {
    rules: IndexMap<RuleId, Rule>,
}

impl RuleRegistry {
    /// Creates a registry without any rule
    pub fn empty() -> Self {
        Self { rules: IndexMap::new() }
    }

    /// Creates a registry holding every builtin rule
    pub fn with_default_rules() -> Self {
        let mut registry = Self::empty();

        registry.register_class_rule(RuleId::SUPERCLASS_BECAME_INTERFACE, hierarchy::check_superclass_not_interface);
        registry.register_class_rule(RuleId::INTERFACE_BECAME_CLASS, hierarchy::check_interfaces_still_interfaces);
        registry.register_class_rule(RuleId::FINAL_CLASS_INHERITED, hierarchy::check_superclass_not_final);
        registry.register_class_rule(RuleId::ABSTRACT_METHOD_NOT_IMPLEMENTED, abstract_methods::check_abstract_methods_implemented);
        registry.register_class_rule(RuleId::REFERENCED_CLASSES_RESOLVED, references::check_referenced_classes);
        registry.register_class_rule(RuleId::MEMBER_REFERENCES, references::check_member_references);
        registry.register_class_rule(RuleId::DEPRECATED_API_USAGE, deprecation::check_deprecated_usages);
        registry.register_method_rule(RuleId::OVERRIDING_FINAL_METHOD, members::check_not_overriding_final);
        registry.register_method_rule(RuleId::METHOD_SIGNATURE_TYPES_RESOLVED, members::check_method_signature_types);
        registry.register_field_rule(RuleId::FIELD_TYPE_RESOLVED, members::check_field_type);

        registry
    }

    /// Adds or replaces a class rule
    pub fn register_class_rule<F>(&mut self, id: RuleId, rule: F)
    where
        F: Fn(&ClassDefinition, &mut VerificationContext<'_>) + Send + Sync + 'static,
    {
        self.rules.insert(id, Rule::Class(Box::new(rule)));
    }

    pub fn register_method_rule<F>(&mut self, id: RuleId, rule: F)
    where
        F: Fn(&ClassDefinition, &MethodInfo, &mut VerificationContext<'_>) + Send + Sync + 'static,
    {
        self.rules.insert(id, Rule::Method(Box::new(rule)));
    }

    pub fn register_field_rule<F>(&mut self, id: RuleId, rule: F)
    where
        F: Fn(&ClassDefinition, &FieldInfo, &mut VerificationContext<'_>) + Send + Sync + 'static,
    {
        self.rules.insert(id, Rule::Field(Box::new(rule)));
    }

    /// Removes a rule, returning whether it was registered
    pub fn remove(&mut self, id: &RuleId) -> bool {
        self.rules.shift_remove(id).is_some()
    }

    pub fn contains(&self, id: &RuleId) -> bool {
        self.rules.contains_key(id)
    }

    pub fn kind_of(&self, id: &RuleId) -> Option<RuleKind> {
        self.rules.get(id).map(|rule| match rule {
            Rule::Class(_) => RuleKind::Class,
            Rule::Method(_) => RuleKind::Method,
            Rule::Field(_) => RuleKind::Field,
        })
    }

    pub fn ids(&self) -> impl Iterator<Item = &RuleId> {
        self.rules.keys()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn run_class_rules(&self, class: &ClassDefinition, ctx: &mut VerificationContext<'_>) {
        for rule in self.rules.values() {
            if let Rule::Class(check) = rule {
                check(class, ctx);
            }
        }
    }

    /// Runs method and field rules over every member declared by `class`
    pub fn run_member_rules(&self, class: &ClassDefinition, ctx: &mut VerificationContext<'_>) {
        for rule in self.rules.values() {
            match rule {
                Rule::Class(_) => {}
                Rule::Method(check) => {
                    for method in &class.methods {
                        check(class, method, ctx);
                    }
                }
                Rule::Field(check) => {
                    for field in &class.fields {
                        check(class, field, ctx);
                    }
                }
            }
        }
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleRegistry").field("rules", &self.rules.keys().collect::<Vec<_>>()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::{AccessFlags, ClassIndex};
    use crate::problems::{Location, Warning};

    #[test]
    fn test_default_rules_registered_in_order() {
        let registry = RuleRegistry::with_default_rules();
        assert_eq!(registry.len(), 10);
        assert_eq!(registry.ids().next(), Some(&RuleId::SUPERCLASS_BECAME_INTERFACE));
        assert_eq!(registry.kind_of(&RuleId::FIELD_TYPE_RESOLVED), Some(RuleKind::Field));
    }

    #[test]
    fn test_custom_rule_registration_and_removal() {
        let mut registry = RuleRegistry::empty();
        registry.register_class_rule(RuleId::new("no-default-package"), |class, ctx| {
            if class.package_name().is_empty() {
                ctx.register_warning(Warning::PluginStructure {
                    message: format!("{} is in the default package", class.name),
                });
            }
        });

        let index = ClassIndex::new("empty");
        let mut ctx = VerificationContext::new(&index);
        registry.run_class_rules(&ClassDefinition::new("Main", AccessFlags::new(AccessFlags::PUBLIC)), &mut ctx);
        assert_eq!(ctx.warnings().len(), 1);

        assert!(registry.remove(&RuleId::new("no-default-package")));
        assert!(!registry.remove(&RuleId::new("no-default-package")));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_member_rules_see_every_member() {
        let mut registry = RuleRegistry::empty();
        registry.register_method_rule(RuleId::new("count-methods"), |class, method, ctx| {
            ctx.register_problem(crate::problems::Problem::ClassNotFound {
                class_name: method.name.clone(),
                location: Location::class(class.name.clone()),
            });
        });
        let class = ClassDefinition::new("p/A", AccessFlags::new(AccessFlags::PUBLIC))
            .with_method(crate::classes::MethodInfo::new("a", "()V", AccessFlags::default()))
            .with_method(crate::classes::MethodInfo::new("b", "()V", AccessFlags::default()));

        let index = ClassIndex::new("empty");
        let mut ctx = VerificationContext::new(&index);
        registry.run_member_rules(&class, &mut ctx);
        assert_eq!(ctx.problems().len(), 2);
    }
}
