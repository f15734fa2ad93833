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

//! Rules about the shape of a class's direct parents

use crate::classes::ClassDefinition;
use crate::context::VerificationContext;
use crate::problems::{ClassLocation, Location, Problem};

/// A class whose declared superclass is now an interface cannot be loaded.
///
/// An unresolvable superclass is left to the resolution problem.
pub fn check_superclass_not_interface(class: &ClassDefinition, ctx: &mut VerificationContext<'_>) {
    if class.is_interface() {
        return;
    }
    let Some(super_name) = class.super_name.as_deref() else {
        return;
    };
    if let Some(superclass) = ctx.resolve_or_problem(super_name, || Location::class(class.name.clone()))
        && superclass.is_interface()
    {
        ctx.register_problem(Problem::SuperClassBecameInterface {
            class: ClassLocation::new(class.name.clone()),
            super_name: super_name.to_string(),
        });
    }
}

/// Every implemented interface must still be an interface
pub fn check_interfaces_still_interfaces(class: &ClassDefinition, ctx: &mut VerificationContext<'_>) {
    for interface in &class.interfaces {
        if let Some(resolved) = ctx.resolve_or_problem(interface, || Location::class(class.name.clone()))
            && !resolved.is_interface()
        {
            ctx.register_problem(Problem::InterfaceBecameClass {
                class: ClassLocation::new(class.name.clone()),
                interface: interface.clone(),
            });
        }
    }
}

pub fn check_superclass_not_final(class: &ClassDefinition, ctx: &mut VerificationContext<'_>) {
    if class.is_interface() {
        return;
    }
    let Some(super_name) = class.super_name.as_deref() else {
        return;
    };
    if let Some(superclass) = ctx.resolve_or_problem(super_name, || Location::class(class.name.clone()))
        && superclass.is_final()
        && !superclass.is_interface()
    {
        ctx.register_problem(Problem::FinalClassInherited {
            class: ClassLocation::new(class.name.clone()),
            final_class: super_name.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::{AccessFlags, ClassIndex};

    const INTERFACE: u16 = AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT;

    fn host() -> ClassIndex {
        ClassIndex::from_definitions(
            "host",
            [
                ClassDefinition::new("h/NowInterface", AccessFlags::new(INTERFACE)),
                ClassDefinition::new("h/NowClass", AccessFlags::new(AccessFlags::PUBLIC)),
                ClassDefinition::new("h/Sealed", AccessFlags::new(AccessFlags::PUBLIC | AccessFlags::FINAL)),
                ClassDefinition::new("h/Listener", AccessFlags::new(INTERFACE)),
            ],
        )
    }

    #[test]
    fn test_superclass_became_interface() {
        let host = host();
        let mut ctx = VerificationContext::new(&host);
        let class = ClassDefinition::new("p/A", AccessFlags::new(AccessFlags::PUBLIC)).with_super("h/NowInterface");

        check_superclass_not_interface(&class, &mut ctx);

        assert_eq!(
            ctx.problems().iter().collect::<Vec<_>>(),
            vec![&Problem::SuperClassBecameInterface {
                class: ClassLocation::new("p/A"),
                super_name: "h/NowInterface".into(),
            }]
        );
    }

    #[test]
    fn test_unresolved_superclass_is_only_a_resolution_problem() {
        let host = host();
        let mut ctx = VerificationContext::new(&host);
        let class = ClassDefinition::new("p/A", AccessFlags::new(AccessFlags::PUBLIC)).with_super("h/Gone");

        check_superclass_not_interface(&class, &mut ctx);
        check_superclass_not_final(&class, &mut ctx);

        assert_eq!(ctx.problems().len(), 1);
        assert!(matches!(ctx.problems()[0], Problem::ClassNotFound { .. }));
    }

    #[test]
    fn test_interface_became_class() {
        let host = host();
        let mut ctx = VerificationContext::new(&host);
        let class = ClassDefinition::new("p/A", AccessFlags::new(AccessFlags::PUBLIC))
            .with_super("h/NowClass")
            .with_interface("h/Listener")
            .with_interface("h/NowClass");

        check_interfaces_still_interfaces(&class, &mut ctx);
        check_superclass_not_interface(&class, &mut ctx);

        assert_eq!(ctx.problems().len(), 1);
        assert!(matches!(&ctx.problems()[0], Problem::InterfaceBecameClass { interface, .. } if interface == "h/NowClass"));
    }

    #[test]
    fn test_final_superclass() {
        let host = host();
        let mut ctx = VerificationContext::new(&host);
        let class = ClassDefinition::new("p/A", AccessFlags::new(AccessFlags::PUBLIC)).with_super("h/Sealed");

        check_superclass_not_final(&class, &mut ctx);

        assert!(matches!(&ctx.problems()[0], Problem::FinalClassInherited { final_class, .. } if final_class == "h/Sealed"));
    }
}
