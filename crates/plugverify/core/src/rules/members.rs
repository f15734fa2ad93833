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

//! Method and field level rules

use std::collections::HashSet;

use crate::classes::descriptor::referenced_classes;
use crate::classes::{ClassDefinition, FieldInfo, MethodInfo, package_of};
use crate::context::VerificationContext;
use crate::problems::{FieldLocation, Location, MethodLocation, Problem};

/// A method may not override a final method of any superclass
pub fn check_not_overriding_final(class: &ClassDefinition, method: &MethodInfo, ctx: &mut VerificationContext<'_>) {
    if method.is_constructor() || method.is_static_initializer() || method.access.is_static() || method.access.is_private() {
        return;
    }

    let mut seen = HashSet::new();
    let mut current = class.super_name.clone();
    while let Some(name) = current {
        if !seen.insert(name.clone()) {
            return;
        }
        let Some(ancestor) = ctx.resolve(&name) else {
            return;
        };
        if let Some(overridden) = ancestor.find_method(&method.name, &method.descriptor)
            && !overridden.access.is_private()
            && !overridden.access.is_static()
        {
            let visible = overridden.access.is_public() || overridden.access.is_protected() || package_of(&ancestor.name) == package_of(&class.name);
            if visible && overridden.access.is_final() {
                ctx.register_problem(Problem::OverridingFinalMethod {
                    method: MethodLocation::new(ancestor.name.clone(), overridden.name.clone(), overridden.descriptor.clone()),
                    location: MethodLocation::new(class.name.clone(), method.name.clone(), method.descriptor.clone()),
                });
            }
            if visible {
                return;
            }
        }
        current = ancestor.super_name.clone();
    }
}

/// Parameter and return types of a declared method must resolve
pub fn check_method_signature_types(class: &ClassDefinition, method: &MethodInfo, ctx: &mut VerificationContext<'_>) {
    for type_name in referenced_classes(&method.descriptor) {
        ctx.resolve_or_problem(type_name, || {
            Location::Method(MethodLocation::new(class.name.clone(), method.name.clone(), method.descriptor.clone()))
        });
    }
}

/// The type of a declared field must resolve
pub fn check_field_type(class: &ClassDefinition, field: &FieldInfo, ctx: &mut VerificationContext<'_>) {
    for type_name in referenced_classes(&field.descriptor) {
        ctx.resolve_or_problem(type_name, || {
            Location::Field(FieldLocation::new(class.name.clone(), field.name.clone(), field.descriptor.clone()))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::{AccessFlags, ClassIndex};

    fn host() -> ClassIndex {
        ClassIndex::from_definitions(
            "host",
            [
                ClassDefinition::new("h/Base", AccessFlags::new(AccessFlags::PUBLIC))
                    .with_method(MethodInfo::new("locked", "()V", AccessFlags::new(AccessFlags::PUBLIC | AccessFlags::FINAL)))
                    .with_method(MethodInfo::new("hidden", "()V", AccessFlags::new(AccessFlags::PRIVATE | AccessFlags::FINAL))),
                ClassDefinition::new("h/Middle", AccessFlags::new(AccessFlags::PUBLIC)).with_super("h/Base"),
                ClassDefinition::new("h/Type", AccessFlags::new(AccessFlags::PUBLIC)),
            ],
        )
    }

    #[test]
    fn test_overriding_final_through_intermediate_class() {
        let host = host();
        let mut ctx = VerificationContext::new(&host);
        let class = ClassDefinition::new("p/Impl", AccessFlags::new(AccessFlags::PUBLIC)).with_super("h/Middle");
        let locked = MethodInfo::new("locked", "()V", AccessFlags::new(AccessFlags::PUBLIC));
        let hidden = MethodInfo::new("hidden", "()V", AccessFlags::new(AccessFlags::PUBLIC));

        check_not_overriding_final(&class, &locked, &mut ctx);
        check_not_overriding_final(&class, &hidden, &mut ctx);

        assert_eq!(
            ctx.problems().iter().cloned().collect::<Vec<_>>(),
            vec![Problem::OverridingFinalMethod {
                method: MethodLocation::new("h/Base", "locked", "()V"),
                location: MethodLocation::new("p/Impl", "locked", "()V"),
            }]
        );
    }

    #[test]
    fn test_signature_and_field_types() {
        let host = host();
        let mut ctx = VerificationContext::new(&host);
        let class = ClassDefinition::new("p/Impl", AccessFlags::new(AccessFlags::PUBLIC));
        let method = MethodInfo::new("convert", "(Lh/Type;[Lh/Missing;)V", AccessFlags::new(AccessFlags::PUBLIC));
        let field = FieldInfo::new("cache", "Lh/AlsoMissing;", AccessFlags::new(AccessFlags::PRIVATE));

        check_method_signature_types(&class, &method, &mut ctx);
        check_field_type(&class, &field, &mut ctx);

        let missing: Vec<(String, Location)> = ctx
            .problems()
            .iter()
            .filter_map(|p| match p {
                Problem::ClassNotFound { class_name, location } => Some((class_name.clone(), location.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            missing,
            vec![
                ("h/Missing".to_string(), Location::Method(MethodLocation::new("p/Impl", "convert", "(Lh/Type;[Lh/Missing;)V"))),
                ("h/AlsoMissing".to_string(), Location::Field(FieldLocation::new("p/Impl", "cache", "Lh/AlsoMissing;"))),
            ]
        );
    }
}
