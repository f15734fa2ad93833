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

use std::collections::{HashMap, HashSet};

use crate::classes::{ClassDefinition, MethodInfo};
use crate::context::VerificationContext;
use crate::problems::{ClassLocation, MethodLocation, Problem};
use crate::rules::lookup::ancestry;

/// A concrete class must implement every abstract method it inherits.
///
/// Skipped when any ancestor is unresolved: the missing class might be the one
/// providing the implementation.
pub fn check_abstract_methods_implemented(class: &ClassDefinition, ctx: &mut VerificationContext<'_>) {
    if !class.is_concrete() {
        return;
    }
    let ancestry = ancestry(ctx, class);
    if !ancestry.complete {
        return;
    }

    // The most specific declaration along the superclass chain wins, so an
    // abstract redeclaration hides a concrete method further up.
    let mut selected: HashMap<(&str, &str), (&ClassDefinition, &MethodInfo)> = HashMap::new();
    let superclass_chain = std::iter::once(class).chain(ancestry.classes.iter().map(|c| c.as_ref()).filter(|c| !c.is_interface()));
    for owner in superclass_chain {
        for method in owner.methods.iter().filter(|m| overridable(m)) {
            selected.entry((method.name.as_str(), method.descriptor.as_str())).or_insert((owner, method));
        }
    }
    let defaults: HashSet<(&str, &str)> = ancestry
        .classes
        .iter()
        .filter(|c| c.is_interface())
        .flat_map(|c| c.methods.iter())
        .filter(|m| overridable(m) && !m.access.is_abstract())
        .map(|m| (m.name.as_str(), m.descriptor.as_str()))
        .collect();

    let mut missing: Vec<(&ClassDefinition, &MethodInfo)> = Vec::new();
    let mut reported = HashSet::new();
    for owner in ancestry.classes.iter().map(|c| c.as_ref()) {
        for method in owner.methods.iter().filter(|m| overridable(m) && m.access.is_abstract()) {
            let signature = (method.name.as_str(), method.descriptor.as_str());
            let declaration = match selected.get(&signature) {
                Some((_, chosen)) if !chosen.access.is_abstract() => continue,
                Some(&chosen) => chosen,
                None if defaults.contains(&signature) => continue,
                None => (owner, method),
            };
            if reported.insert(signature) {
                missing.push(declaration);
            }
        }
    }

    for (owner, method) in missing {
        ctx.register_problem(Problem::MethodNotImplemented {
            class: ClassLocation::new(class.name.clone()),
            method: MethodLocation::new(owner.name.clone(), method.name.clone(), method.descriptor.clone()),
        });
    }
}

fn overridable(method: &MethodInfo) -> bool {
    !method.access.is_static() && !method.access.is_private()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::{AccessFlags, ClassIndex};
    use crate::walker::JAVA_LANG_OBJECT;

    const INTERFACE: u16 = AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT;
    const ABSTRACT_METHOD: u16 = AccessFlags::PUBLIC | AccessFlags::ABSTRACT;

    fn host() -> ClassIndex {
        ClassIndex::from_definitions(
            "host",
            [
                ClassDefinition::new(JAVA_LANG_OBJECT, AccessFlags::new(AccessFlags::PUBLIC)),
                ClassDefinition::new("h/Action", AccessFlags::new(INTERFACE))
                    .with_super(JAVA_LANG_OBJECT)
                    .with_method(MethodInfo::new("perform", "()V", AccessFlags::new(ABSTRACT_METHOD)))
                    .with_method(MethodInfo::new("update", "()V", AccessFlags::new(AccessFlags::PUBLIC))),
                ClassDefinition::new("h/BaseAction", AccessFlags::new(AccessFlags::PUBLIC | AccessFlags::ABSTRACT))
                    .with_super(JAVA_LANG_OBJECT)
                    .with_interface("h/Action")
                    .with_method(MethodInfo::new("isDumbAware", "()Z", AccessFlags::new(ABSTRACT_METHOD))),
            ],
        )
    }

    #[test]
    fn test_reports_each_missing_implementation_once() {
        let host = host();
        let mut ctx = VerificationContext::new(&host);
        let class = ClassDefinition::new("p/MyAction", AccessFlags::new(AccessFlags::PUBLIC))
            .with_super("h/BaseAction")
            .with_interface("h/Action")
            .with_method(MethodInfo::new("isDumbAware", "()Z", AccessFlags::new(AccessFlags::PUBLIC)));

        check_abstract_methods_implemented(&class, &mut ctx);

        assert_eq!(
            ctx.problems().iter().cloned().collect::<Vec<_>>(),
            vec![Problem::MethodNotImplemented {
                class: ClassLocation::new("p/MyAction"),
                method: MethodLocation::new("h/Action", "perform", "()V"),
            }]
        );
    }

    #[test]
    fn test_abstract_classes_and_incomplete_hierarchies_are_skipped() {
        let host = host();
        let mut ctx = VerificationContext::new(&host);
        let abstract_class = ClassDefinition::new("p/Partial", AccessFlags::new(AccessFlags::PUBLIC | AccessFlags::ABSTRACT)).with_super("h/BaseAction");
        let orphan = ClassDefinition::new("p/Orphan", AccessFlags::new(AccessFlags::PUBLIC))
            .with_super("h/BaseAction")
            .with_interface("h/Removed");

        check_abstract_methods_implemented(&abstract_class, &mut ctx);
        check_abstract_methods_implemented(&orphan, &mut ctx);

        assert!(ctx.problems().is_empty());
    }

    #[test]
    fn test_abstract_redeclaration_hides_inherited_implementation() {
        let host = ClassIndex::from_definitions(
            "host",
            [
                ClassDefinition::new(JAVA_LANG_OBJECT, AccessFlags::new(AccessFlags::PUBLIC)),
                ClassDefinition::new("h/Component", AccessFlags::new(AccessFlags::PUBLIC))
                    .with_super(JAVA_LANG_OBJECT)
                    .with_method(MethodInfo::new("dispose", "()V", AccessFlags::new(AccessFlags::PUBLIC))),
                ClassDefinition::new("h/ManagedComponent", AccessFlags::new(AccessFlags::PUBLIC | AccessFlags::ABSTRACT))
                    .with_super("h/Component")
                    .with_method(MethodInfo::new("dispose", "()V", AccessFlags::new(ABSTRACT_METHOD))),
            ],
        );
        let mut ctx = VerificationContext::new(&host);
        let class = ClassDefinition::new("p/Widget", AccessFlags::new(AccessFlags::PUBLIC)).with_super("h/ManagedComponent");

        check_abstract_methods_implemented(&class, &mut ctx);

        assert_eq!(
            ctx.problems().iter().cloned().collect::<Vec<_>>(),
            vec![Problem::MethodNotImplemented {
                class: ClassLocation::new("p/Widget"),
                method: MethodLocation::new("h/ManagedComponent", "dispose", "()V"),
            }]
        );
    }
}
