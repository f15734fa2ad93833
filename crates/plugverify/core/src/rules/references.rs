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

//! Rules over the symbolic references in a class's constant pool

use crate::classes::{ClassDefinition, MemberKind, MemberReference};
use crate::context::VerificationContext;
use crate::problems::{FieldLocation, Location, MethodLocation, Problem};
use crate::rules::lookup::{MemberSearch, find_field, find_method, is_accessible};

/// Owners whose methods are linked by call site rather than by declaration
const SIGNATURE_POLYMORPHIC_OWNERS: [&str; 2] = ["java/lang/invoke/MethodHandle", "java/lang/invoke/VarHandle"];

/// Every class named by the constant pool must resolve
pub fn check_referenced_classes(class: &ClassDefinition, ctx: &mut VerificationContext<'_>) {
    for referenced in &class.class_references {
        ctx.resolve_or_problem(referenced, || Location::class(class.name.clone()));
    }
}

/// Every referenced field and method must exist on its owner and be accessible
pub fn check_member_references(class: &ClassDefinition, ctx: &mut VerificationContext<'_>) {
    for reference in &class.member_references {
        match reference.kind {
            MemberKind::Field => check_field_reference(class, reference, ctx),
            MemberKind::Method | MemberKind::InterfaceMethod => check_method_reference(class, reference, ctx),
        }
    }
}

fn check_method_reference(class: &ClassDefinition, reference: &MemberReference, ctx: &mut VerificationContext<'_>) {
    // Methods invoked on arrays (clone, Object methods) are provided by the VM
    if reference.owner.starts_with('[') || SIGNATURE_POLYMORPHIC_OWNERS.contains(&reference.owner.as_str()) {
        return;
    }
    let Some(owner) = ctx.resolve_or_problem(&reference.owner, || Location::class(class.name.clone())) else {
        return;
    };

    match find_method(ctx, &owner, &reference.name, &reference.descriptor) {
        MemberSearch::Found { declaring, member } => {
            if !is_accessible(ctx, class, &declaring, member.access) {
                ctx.register_problem(Problem::IllegalMethodAccess {
                    method: MethodLocation::new(declaring.name.clone(), member.name, member.descriptor),
                    access: member.access.level(),
                    location: Location::class(class.name.clone()),
                });
            }
        }
        MemberSearch::Missing => ctx.register_problem(Problem::MethodNotFound {
            method: MethodLocation::from(reference),
            location: Location::class(class.name.clone()),
        }),
        MemberSearch::Unknown => {}
    }
}

fn check_field_reference(class: &ClassDefinition, reference: &MemberReference, ctx: &mut VerificationContext<'_>) {
    if reference.owner.starts_with('[') {
        return;
    }
    let Some(owner) = ctx.resolve_or_problem(&reference.owner, || Location::class(class.name.clone())) else {
        return;
    };

    match find_field(ctx, &owner, &reference.name, &reference.descriptor) {
        MemberSearch::Found { declaring, member } => {
            if !is_accessible(ctx, class, &declaring, member.access) {
                ctx.register_problem(Problem::IllegalFieldAccess {
                    field: FieldLocation::new(declaring.name.clone(), member.name, member.descriptor),
                    access: member.access.level(),
                    location: Location::class(class.name.clone()),
                });
            }
        }
        MemberSearch::Missing => ctx.register_problem(Problem::FieldNotFound {
            field: FieldLocation::from(reference),
            location: Location::class(class.name.clone()),
        }),
        MemberSearch::Unknown => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::{AccessFlags, AccessLevel, ClassIndex, FieldInfo, MethodInfo};
    use crate::walker::JAVA_LANG_OBJECT;

    fn host() -> ClassIndex {
        ClassIndex::from_definitions(
            "host",
            [
                ClassDefinition::new(JAVA_LANG_OBJECT, AccessFlags::new(AccessFlags::PUBLIC))
                    .with_method(MethodInfo::new("toString", "()Ljava/lang/String;", AccessFlags::new(AccessFlags::PUBLIC))),
                ClassDefinition::new("h/Service", AccessFlags::new(AccessFlags::PUBLIC))
                    .with_super(JAVA_LANG_OBJECT)
                    .with_method(MethodInfo::new("start", "()V", AccessFlags::new(AccessFlags::PUBLIC)))
                    .with_method(MethodInfo::new("internal", "()V", AccessFlags::new(AccessFlags::PRIVATE)))
                    .with_field(FieldInfo::new("state", "I", AccessFlags::default())),
            ],
        )
    }

    fn plugin_class() -> ClassDefinition {
        ClassDefinition::new("p/Client", AccessFlags::new(AccessFlags::PUBLIC)).with_super(JAVA_LANG_OBJECT)
    }

    #[test]
    fn test_unresolved_class_reference() {
        let host = host();
        let mut ctx = VerificationContext::new(&host);
        let class = plugin_class().with_class_reference("h/Service").with_class_reference("h/Z");

        check_referenced_classes(&class, &mut ctx);

        assert_eq!(
            ctx.problems().iter().cloned().collect::<Vec<_>>(),
            vec![Problem::ClassNotFound {
                class_name: "h/Z".into(),
                location: Location::class("p/Client"),
            }]
        );
    }

    #[test]
    fn test_member_reference_outcomes() {
        let host = host();
        let mut ctx = VerificationContext::new(&host);
        let class = plugin_class()
            .with_member_reference(MemberReference::method("h/Service", "start", "()V"))
            .with_member_reference(MemberReference::method("h/Service", "toString", "()Ljava/lang/String;"))
            .with_member_reference(MemberReference::method("h/Service", "stop", "()V"))
            .with_member_reference(MemberReference::method("h/Service", "internal", "()V"))
            .with_member_reference(MemberReference::field("h/Service", "state", "I"))
            .with_member_reference(MemberReference::field("h/Service", "gone", "J"))
            .with_member_reference(MemberReference::method("[Lh/Service;", "clone", "()Ljava/lang/Object;"))
            .with_member_reference(MemberReference::method("java/lang/invoke/MethodHandle", "invokeExact", "(I)V"));

        check_member_references(&class, &mut ctx);

        let problems: Vec<Problem> = ctx.problems().iter().cloned().collect();
        let here = Location::class("p/Client");
        assert_eq!(
            problems,
            vec![
                Problem::MethodNotFound {
                    method: MethodLocation::new("h/Service", "stop", "()V"),
                    location: here.clone(),
                },
                Problem::IllegalMethodAccess {
                    method: MethodLocation::new("h/Service", "internal", "()V"),
                    access: AccessLevel::Private,
                    location: here.clone(),
                },
                Problem::IllegalFieldAccess {
                    field: FieldLocation::new("h/Service", "state", "I"),
                    access: AccessLevel::PackagePrivate,
                    location: here.clone(),
                },
                Problem::FieldNotFound {
                    field: FieldLocation::new("h/Service", "gone", "J"),
                    location: here,
                },
            ]
        );
    }
}
