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

// Purpose: Extracts class names from JVM field and method type descriptors.

/// Strips array dimensions from a constant-pool class name.
///
/// Returns `None` for arrays of primitives, which name no class.
pub fn class_name_of_array_or_plain(name: &str) -> Option<&str> {
    if !name.starts_with('[') {
        return Some(name);
    }
    let element = name.trim_start_matches('[');
    element.strip_prefix('L').and_then(|rest| rest.strip_suffix(';'))
}

/// Collects the class names mentioned by a field or method descriptor
/// such as `(ILjava/lang/String;[Lcom/a/B;)Lcom/a/C;`.
///
/// Malformed descriptors yield the names decoded up to the first error.
pub fn referenced_classes(descriptor: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = descriptor;
    while let Some(start) = rest.find('L') {
        // Primitive codes never contain 'L', so every 'L' opens an object type
        let after = &rest[start + 1..];
        match after.find(';') {
            Some(end) => {
                let name = &after[..end];
                if !name.is_empty() && !names.contains(&name) {
                    names.push(name);
                }
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_names() {
        assert_eq!(class_name_of_array_or_plain("com/a/B"), Some("com/a/B"));
        assert_eq!(class_name_of_array_or_plain("[[Lcom/a/B;"), Some("com/a/B"));
        assert_eq!(class_name_of_array_or_plain("[I"), None);
    }

    #[test]
    fn test_method_descriptor_classes() {
        let names = referenced_classes("(ILjava/lang/String;[Lcom/a/B;J)Lcom/a/C;");
        assert_eq!(names, vec!["java/lang/String", "com/a/B", "com/a/C"]);
        assert!(referenced_classes("(IJ)V").is_empty());
    }

    #[test]
    fn test_duplicates_are_collapsed() {
        assert_eq!(referenced_classes("(Lcom/a/B;Lcom/a/B;)V"), vec!["com/a/B"]);
    }
}
