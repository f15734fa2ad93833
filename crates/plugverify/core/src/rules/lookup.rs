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

// Purpose: Member lookup and access checks shared by the builtin rules.
// Resolution here is silent; missing ancestors are reported by the walk itself.

use std::collections::HashSet;
use std::sync::Arc;

use crate::classes::{AccessFlags, ClassDefinition, FieldInfo, MethodInfo, outermost_class, package_of};
use crate::context::VerificationContext;
use crate::walker::JAVA_LANG_OBJECT;

/// All ancestors of a class reachable through resolvable names
pub(crate) struct Ancestry {
    /// Superclass chain first, then interfaces in discovery order
    pub classes: Vec<Arc<ClassDefinition>>,
    /// False when some ancestor could not be resolved
    pub complete: bool,
}

pub(crate) fn ancestry(ctx: &mut VerificationContext<'_>, class: &ClassDefinition) -> Ancestry {
    let mut classes = Vec::new();
    let mut complete = true;
    let mut seen: HashSet<String> = HashSet::from([class.name.clone()]);
    let mut interfaces: Vec<String> = class.interfaces.clone();

    let mut next_super = super_of(class);
    while let Some(name) = next_super {
        if !seen.insert(name.clone()) {
            break;
        }
        match ctx.resolve(&name) {
            Some(parent) => {
                interfaces.extend(parent.interfaces.iter().cloned());
                next_super = super_of(&parent);
                classes.push(parent);
            }
            None => {
                complete = false;
                next_super = None;
            }
        }
    }

    while let Some(name) = interfaces.pop() {
        if !seen.insert(name.clone()) {
            continue;
        }
        match ctx.resolve(&name) {
            Some(interface) => {
                interfaces.extend(interface.interfaces.iter().cloned());
                classes.push(interface);
            }
            None => complete = false,
        }
    }

    Ancestry { classes, complete }
}

fn super_of(class: &ClassDefinition) -> Option<String> {
    match &class.super_name {
        Some(name) => Some(name.clone()),
        None if class.name != JAVA_LANG_OBJECT => Some(JAVA_LANG_OBJECT.to_string()),
        None => None,
    }
}

/// Result of searching a member through a class and its ancestors
pub(crate) enum MemberSearch<T> {
    Found { declaring: Arc<ClassDefinition>, member: T },
    Missing,
    /// Not found, but an unresolved ancestor might declare it
    Unknown,
}

pub(crate) fn find_method(ctx: &mut VerificationContext<'_>, owner: &Arc<ClassDefinition>, name: &str, descriptor: &str) -> MemberSearch<MethodInfo> {
    if let Some(method) = owner.find_method(name, descriptor) {
        return MemberSearch::Found {
            declaring: Arc::clone(owner),
            member: method.clone(),
        };
    }
    let ancestry = ancestry(ctx, owner);
    for class in &ancestry.classes {
        if let Some(method) = class.find_method(name, descriptor) {
            return MemberSearch::Found {
                declaring: Arc::clone(class),
                member: method.clone(),
            };
        }
    }
    if ancestry.complete { MemberSearch::Missing } else { MemberSearch::Unknown }
}

pub(crate) fn find_field(ctx: &mut VerificationContext<'_>, owner: &Arc<ClassDefinition>, name: &str, descriptor: &str) -> MemberSearch<FieldInfo> {
    if let Some(field) = owner.find_field(name, descriptor) {
        return MemberSearch::Found {
            declaring: Arc::clone(owner),
            member: field.clone(),
        };
    }
    let ancestry = ancestry(ctx, owner);
    for class in &ancestry.classes {
        if let Some(field) = class.find_field(name, descriptor) {
            return MemberSearch::Found {
                declaring: Arc::clone(class),
                member: field.clone(),
            };
        }
    }
    if ancestry.complete { MemberSearch::Missing } else { MemberSearch::Unknown }
}

/// Whether `accessor` may use a member with `access` declared in `declaring`
pub(crate) fn is_accessible(ctx: &mut VerificationContext<'_>, accessor: &ClassDefinition, declaring: &ClassDefinition, access: AccessFlags) -> bool {
    if access.is_public() || accessor.name == declaring.name {
        return true;
    }
    if access.is_private() {
        return outermost_class(&accessor.name) == outermost_class(&declaring.name);
    }
    let same_package = package_of(&accessor.name) == package_of(&declaring.name);
    if access.is_protected() {
        return same_package || is_subclass_of(ctx, accessor, &declaring.name);
    }
    same_package
}

/// Walks the superclass chain of `class` looking for `ancestor`.
///
/// Nested classes of a subclass also qualify, as their outer class does.
pub(crate) fn is_subclass_of(ctx: &mut VerificationContext<'_>, class: &ClassDefinition, ancestor: &str) -> bool {
    let mut starts = vec![class.super_name.clone()];
    let outer = outermost_class(&class.name);
    if outer != class.name {
        starts.push(ctx.resolve(outer).and_then(|definition| definition.super_name.clone()));
    }

    for start in starts.into_iter().flatten() {
        let mut seen = HashSet::new();
        let mut current = Some(start);
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            if !seen.insert(name.clone()) {
                break;
            }
            current = ctx.resolve(&name).and_then(|definition| definition.super_name.clone());
        }
    }
    false
}
