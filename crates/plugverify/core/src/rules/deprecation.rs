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

// Purpose: Warns about use of deprecated host API. Deprecated classes of the
// plugin itself are its own business and never reported.

use crate::classes::{ClassDefinition, MemberKind, to_dotted};
use crate::context::VerificationContext;
use crate::problems::{FieldLocation, Location, MethodLocation, Warning};
use crate::rules::lookup::{MemberSearch, find_field, find_method};

pub fn check_deprecated_usages(class: &ClassDefinition, ctx: &mut VerificationContext<'_>) {
    let parents = class.super_name.iter().chain(class.interfaces.iter());
    for parent in parents {
        if ctx.is_plugin_class(parent) {
            continue;
        }
        if let Some(resolved) = ctx.resolve(parent)
            && resolved.deprecated
        {
            ctx.register_warning(Warning::DeprecatedApiUsage {
                api: format!("class {}", to_dotted(parent)),
                location: Location::class(class.name.clone()),
            });
        }
    }

    for reference in &class.member_references {
        if ctx.is_plugin_class(&reference.owner) {
            continue;
        }
        let Some(owner) = ctx.resolve(&reference.owner) else {
            continue;
        };
        let api = match reference.kind {
            MemberKind::Field => match find_field(ctx, &owner, &reference.name, &reference.descriptor) {
                MemberSearch::Found { declaring, member } if member.deprecated || declaring.deprecated => {
                    Some(format!("field {}", FieldLocation::new(declaring.name.clone(), member.name, member.descriptor)))
                }
                _ => None,
            },
            MemberKind::Method | MemberKind::InterfaceMethod => match find_method(ctx, &owner, &reference.name, &reference.descriptor) {
                MemberSearch::Found { declaring, member } if member.deprecated || declaring.deprecated => {
                    Some(format!("method {}", MethodLocation::new(declaring.name.clone(), member.name, member.descriptor)))
                }
                _ => None,
            },
        };
        if let Some(api) = api {
            ctx.register_warning(Warning::DeprecatedApiUsage {
                api,
                location: Location::class(class.name.clone()),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::{AccessFlags, ClassIndex, MemberReference, MethodInfo};

    #[test]
    fn test_deprecated_parent_and_member() {
        let mut old_method = MethodInfo::new("legacy", "()V", AccessFlags::new(AccessFlags::PUBLIC));
        old_method.deprecated = true;
        let host = ClassIndex::from_definitions(
            "host",
            [
                ClassDefinition::new("h/OldBase", AccessFlags::new(AccessFlags::PUBLIC)).deprecated(),
                ClassDefinition::new("h/Util", AccessFlags::new(AccessFlags::PUBLIC))
                    .with_method(old_method)
                    .with_method(MethodInfo::new("fresh", "()V", AccessFlags::new(AccessFlags::PUBLIC))),
            ],
        );
        let mut ctx = VerificationContext::new(&host);
        let class = ClassDefinition::new("p/A", AccessFlags::new(AccessFlags::PUBLIC))
            .with_super("h/OldBase")
            .with_member_reference(MemberReference::method("h/Util", "legacy", "()V"))
            .with_member_reference(MemberReference::method("h/Util", "fresh", "()V"));

        check_deprecated_usages(&class, &mut ctx);

        let messages: Vec<String> = ctx.warnings().iter().map(Warning::message).collect();
        assert_eq!(
            messages,
            vec![
                "Deprecated API class h.OldBase is used in class p.A".to_string(),
                "Deprecated API method h.Util.legacy()V is used in class p.A".to_string(),
            ]
        );
        assert!(ctx.problems().is_empty());
    }

    #[test]
    fn test_plugin_own_deprecations_are_ignored() {
        let plugin = ClassIndex::from_definitions("plugin", [ClassDefinition::new("p/Old", AccessFlags::new(AccessFlags::PUBLIC)).deprecated()]);
        let mut ctx = VerificationContext::new(&plugin).with_plugin_classes(&plugin);
        let class = ClassDefinition::new("p/New", AccessFlags::new(AccessFlags::PUBLIC)).with_super("p/Old");

        check_deprecated_usages(&class, &mut ctx);

        assert!(ctx.warnings().is_empty());
    }
}
