//! Immutable descriptors of the extensions and groups declared by a graph.

use serde::Serialize;

use crate::loc::Loc;

/// Addon providing the generic extension group whose membership is driven by
/// the graph.
pub const DEFAULT_EXTENSION_GROUP: &str = "default_extension_group";

/// One extension group as declared in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionGroupInfo {
    /// App and graph owning the group
    pub loc: Loc,
    pub extension_group_instance_name: String,
    pub extension_group_addon_name: String,
}

impl ExtensionGroupInfo {
    pub fn new(
        loc: Loc,
        instance_name: impl Into<String>,
        addon_name: impl Into<String>,
    ) -> Self {
        Self {
            loc,
            extension_group_instance_name: instance_name.into(),
            extension_group_addon_name: addon_name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.extension_group_instance_name
    }

    pub fn is_default(&self) -> bool {
        self.extension_group_addon_name == DEFAULT_EXTENSION_GROUP
    }
}

/// One extension instance as declared in the graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtensionInfo {
    /// App, graph and extension name
    pub loc: Loc,
    pub extension_group_name: String,
    pub extension_addon_name: String,
    pub property: serde_json::Value,
}

impl ExtensionInfo {
    pub fn new(
        loc: Loc,
        extension_group_name: impl Into<String>,
        addon_name: impl Into<String>,
    ) -> Self {
        Self {
            loc,
            extension_group_name: extension_group_name.into(),
            extension_addon_name: addon_name.into(),
            property: serde_json::Value::Null,
        }
    }

    pub fn with_property(mut self, property: serde_json::Value) -> Self {
        self.property = property;
        self
    }

    pub fn name(&self) -> &str {
        self.loc.extension.as_deref().unwrap_or_default()
    }
}

/// What an extension group has to instantiate: an extension addon and the
/// instance name to give it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AddonInstancePair {
    pub addon_name: String,
    pub instance_name: String,
}

impl AddonInstancePair {
    pub fn new(addon_name: impl Into<String>, instance_name: impl Into<String>) -> Self {
        Self {
            addon_name: addon_name.into(),
            instance_name: instance_name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_info_name() {
        let info = ExtensionInfo::new(Loc::new("app", "g1").with_extension("asr"), "g", "deepgram");
        assert_eq!(info.name(), "asr");
        assert_eq!(info.extension_group_name, "g");
        assert!(info.property.is_null());
    }

    #[test]
    fn test_group_info_default() {
        let info = ExtensionGroupInfo::new(Loc::new("app", "g1"), "g", DEFAULT_EXTENSION_GROUP);
        assert!(info.is_default());
        assert_eq!(info.name(), "g");
    }
}
