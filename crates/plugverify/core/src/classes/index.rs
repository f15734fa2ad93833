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

//! In-memory class index keyed by internal class name

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::classes::{ClassDefinition, read_class};
use crate::classpath::ClassResolver;
use crate::error::{ClassFileError, ClassFileResult, ResolutionError};

/// Set of class definitions addressable by name
#[derive(Debug, Clone, Default)]
pub struct ClassIndex {
    name: String,
    classes: HashMap<String, Arc<ClassDefinition>>,
}

impl ClassIndex {
    /// Creates an empty index; `name` identifies it in diagnostics
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            classes: HashMap::new(),
        }
    }

    pub fn from_definitions(name: impl Into<String>, definitions: impl IntoIterator<Item = ClassDefinition>) -> Self {
        let mut index = Self::new(name);
        for definition in definitions {
            index.insert(definition);
        }
        index
    }

    /// Reads every `.class` file below `root`
    pub fn load_directory(name: impl Into<String>, root: &Path) -> ClassFileResult<Self> {
        let mut index = Self::new(name);
        let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let entries = fs::read_dir(&dir).map_err(|source| ClassFileError::Io { path: dir.clone(), source })?;
            for entry in entries {
                let entry = entry.map_err(|source| ClassFileError::Io { path: dir.clone(), source })?;
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else if path.extension().is_some_and(|ext| ext == "class") {
                    let bytes = fs::read(&path).map_err(|source| ClassFileError::Io { path: path.clone(), source })?;
                    let definition = read_class(&bytes).map_err(|err| ClassFileError::Malformed {
                        path: path.clone(),
                        reason: err.to_string(),
                    })?;
                    index.insert(definition);
                }
            }
        }

        debug!(index = %index.name, classes = index.len(), "Loaded class directory {}", root.display());
        Ok(index)
    }

    /// Adds a definition, replacing any previous class with the same name
    pub fn insert(&mut self, definition: ClassDefinition) {
        self.classes.insert(definition.name.clone(), Arc::new(definition));
    }

    pub fn get(&self, class_name: &str) -> Option<&Arc<ClassDefinition>> {
        self.classes.get(class_name)
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.classes.contains_key(class_name)
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    /// Class names in lexical order, for deterministic traversal
    pub fn sorted_class_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.class_names().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ClassResolver for ClassIndex {
    fn find_class(&self, class_name: &str) -> Result<Option<Arc<ClassDefinition>>, ResolutionError> {
        Ok(self.classes.get(class_name).cloned())
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::{AccessFlags, ClassFileBuilder};

    #[test]
    fn test_load_directory_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("com/example");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("A.class"), ClassFileBuilder::new("com/example/A", AccessFlags::PUBLIC).super_class("java/lang/Object").build()).unwrap();
        fs::write(dir.path().join("B.class"), ClassFileBuilder::new("B", AccessFlags::PUBLIC).build()).unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let index = ClassIndex::load_directory("test", dir.path()).unwrap();

        assert_eq!(index.len(), 2);
        assert!(index.contains("com/example/A"));
        assert_eq!(index.sorted_class_names(), vec!["B", "com/example/A"]);
        assert!(index.find_class("com/example/A").unwrap().is_some());
        assert!(index.find_class("missing/C").unwrap().is_none());
    }

    #[test]
    fn test_malformed_class_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Bad.class"), b"not a class").unwrap();

        let err = ClassIndex::load_directory("broken", dir.path()).unwrap_err();
        assert!(matches!(err, ClassFileError::Malformed { .. }));
    }
}
