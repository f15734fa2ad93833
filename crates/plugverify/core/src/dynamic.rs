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

use serde::Serialize;
use std::collections::BTreeSet;

use crate::plugin::PluginDetails;

/// Whether a plugin can be loaded or unloaded without restarting the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DynamicPluginStatus {
    MaybeDynamic,
    NotDynamic(BTreeSet<String>),
}

impl DynamicPluginStatus {
    /// Derives the status from declared components and extension usages
    pub fn of(plugin: &PluginDetails) -> Self {
        let mut reasons = BTreeSet::new();
        if !plugin.components.is_empty() {
            reasons.insert(format!("Plugin declares components: {}", sorted_join(&plugin.components)));
        }
        if !plugin.non_dynamic_extensions.is_empty() {
            reasons.insert(format!(
                "Plugin uses extension points that cannot be loaded dynamically: {}",
                sorted_join(&plugin.non_dynamic_extensions)
            ));
        }

        if reasons.is_empty() { Self::MaybeDynamic } else { Self::NotDynamic(reasons) }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::MaybeDynamic)
    }

    pub fn reasons(&self) -> Vec<&str> {
        match self {
            Self::MaybeDynamic => Vec::new(),
            Self::NotDynamic(reasons) => reasons.iter().map(String::as_str).collect(),
        }
    }
}

fn sorted_join(values: &[String]) -> String {
    let sorted: BTreeSet<&str> = values.iter().map(String::as_str).collect();
    sorted.into_iter().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginInfo;

    #[test]
    fn test_plain_plugin_may_be_dynamic() {
        let plugin = PluginDetails::from_classes(PluginInfo::new("p", "1"), []);
        assert!(DynamicPluginStatus::of(&plugin).is_dynamic());
    }

    #[test]
    fn test_components_and_extensions_prevent_dynamic_loading() {
        let plugin = PluginDetails::from_classes(PluginInfo::new("p", "1"), [])
            .with_component("project-component")
            .with_component("application-component")
            .with_non_dynamic_extension("com.host.startupActivity");

        let status = DynamicPluginStatus::of(&plugin);

        assert_eq!(
            status.reasons(),
            vec![
                "Plugin declares components: application-component, project-component",
                "Plugin uses extension points that cannot be loaded dynamically: com.host.startupActivity",
            ]
        );
    }
}
