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

//! Ancestor traversal over the class hierarchy
//!
//! The walker uses an explicit worklist, so hierarchy depth never grows the
//! call stack. Each class name is visited at most once per walker; reusing
//! one walker for several roots shares that guarantee across all of them.

use std::collections::HashSet;
use std::sync::Arc;

use crate::classes::ClassDefinition;
use crate::context::VerificationContext;
use crate::problems::Location;

/// Implicit superclass of every class without an explicit one
pub const JAVA_LANG_OBJECT: &str = "java/lang/Object";

/// Outcome of a walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOutcome {
    /// Every reachable ancestor was offered to the visitor
    Completed,
    /// The visitor returned `false`
    Stopped,
}

/// Visits a class and its ancestors, each at most once
#[derive(Debug, Clone)]
pub struct ClassGraphWalker {
    include_interfaces: bool,
    visited: HashSet<String>,
}

impl ClassGraphWalker {
    pub fn new(include_interfaces: bool) -> Self {
        Self {
            include_interfaces,
            visited: HashSet::new(),
        }
    }

    /// Walks `start` and its ancestors, superclass branch before interfaces.
    ///
    /// Unresolvable parents are reported through the context and their branch
    /// is skipped. They are not marked visited, so another referencing class
    /// reports them again under its own location.
    pub fn walk<'a, F>(&mut self, ctx: &mut VerificationContext<'a>, start: &Arc<ClassDefinition>, include_self: bool, mut visit: F) -> WalkOutcome
    where
        F: FnMut(&Arc<ClassDefinition>, &mut VerificationContext<'a>) -> bool,
    {
        if include_self {
            if !self.visited.insert(start.name.clone()) {
                return WalkOutcome::Completed;
            }
            if !visit(start, ctx) {
                return WalkOutcome::Stopped;
            }
        }

        let mut pending: Vec<Arc<ClassDefinition>> = vec![Arc::clone(start)];
        while let Some(class) = pending.pop() {
            let parents = self.parents_of(&class);
            let mut resolved = Vec::with_capacity(parents.len());

            for parent in parents {
                if self.visited.contains(parent) {
                    continue;
                }
                let Some(definition) = ctx.resolve_or_problem(parent, || Location::class(class.name.clone())) else {
                    continue;
                };
                if !self.visited.insert(definition.name.clone()) {
                    continue;
                }
                if !visit(&definition, ctx) {
                    return WalkOutcome::Stopped;
                }
                resolved.push(definition);
            }

            // Reverse so the superclass branch is expanded first
            pending.extend(resolved.into_iter().rev());
        }

        WalkOutcome::Completed
    }

    fn parents_of<'c>(&self, class: &'c ClassDefinition) -> Vec<&'c str> {
        let mut parents = Vec::with_capacity(1 + class.interfaces.len());
        match class.super_name.as_deref() {
            Some(super_name) => parents.push(super_name),
            None if class.name != JAVA_LANG_OBJECT => parents.push(JAVA_LANG_OBJECT),
            None => {}
        }
        if self.include_interfaces {
            parents.extend(class.interfaces.iter().map(String::as_str));
        }
        parents
    }

    pub fn has_visited(&self, class_name: &str) -> bool {
        self.visited.contains(class_name)
    }

    pub fn visited(&self) -> impl Iterator<Item = &str> {
        self.visited.iter().map(String::as_str)
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    /// Forgets every visited class so the walker can start over
    pub fn reset(&mut self) {
        self.visited.clear();
    }
}
