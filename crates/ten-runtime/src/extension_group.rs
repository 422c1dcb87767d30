//! Extension groups: the unit of threading.
//!
//! Each group is hosted by exactly one extension thread. The default group
//! learns its members from the graph at startup; a custom group addon may
//! decide them itself.

use std::sync::Arc;

use crate::graph::{AddonInstancePair, ExtensionGroupInfo, DEFAULT_EXTENSION_GROUP};

#[derive(Debug, Clone)]
pub struct ExtensionGroup {
    name: String,
    addon_name: String,
    app_uri: Option<String>,
    graph_id: Option<String>,
    extension_addon_and_instance_name_pairs: Vec<AddonInstancePair>,
    members_fixed: bool,
    info: Option<Arc<ExtensionGroupInfo>>,
}

impl ExtensionGroup {
    pub fn new(name: impl Into<String>, addon_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addon_name: addon_name.into(),
            app_uri: None,
            graph_id: None,
            extension_addon_and_instance_name_pairs: Vec::new(),
            members_fixed: false,
            info: None,
        }
    }

    /// A group whose members are fixed by its addon instead of the graph.
    pub fn with_extensions(mut self, pairs: Vec<AddonInstancePair>) -> Self {
        self.extension_addon_and_instance_name_pairs = pairs;
        self.members_fixed = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addon_name(&self) -> &str {
        &self.addon_name
    }

    pub fn is_default(&self) -> bool {
        self.addon_name == DEFAULT_EXTENSION_GROUP
    }

    /// Whether the graph decides which extensions this group runs.
    pub fn is_graph_driven(&self) -> bool {
        !self.members_fixed
    }

    pub fn app_uri(&self) -> Option<&str> {
        self.app_uri.as_deref()
    }

    pub fn graph_id(&self) -> Option<&str> {
        self.graph_id.as_deref()
    }

    pub(crate) fn bind(&mut self, app_uri: impl Into<String>, graph_id: impl Into<String>) {
        self.app_uri = Some(app_uri.into());
        self.graph_id = Some(graph_id.into());
    }

    pub fn extension_addon_and_instance_name_pairs(&self) -> &[AddonInstancePair] {
        &self.extension_addon_and_instance_name_pairs
    }

    pub(crate) fn set_extension_addon_and_instance_name_pairs(
        &mut self,
        pairs: Vec<AddonInstancePair>,
    ) {
        self.extension_addon_and_instance_name_pairs = pairs;
    }

    /// Declared info, attached once the graph's tables are installed.
    pub fn info(&self) -> Option<&Arc<ExtensionGroupInfo>> {
        self.info.as_ref()
    }

    pub(crate) fn set_info(&mut self, info: Arc<ExtensionGroupInfo>) {
        self.info = Some(info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_group() {
        let group = ExtensionGroup::new("g1", DEFAULT_EXTENSION_GROUP);
        assert!(group.is_default());
        assert!(group.is_graph_driven());
        assert!(group.app_uri().is_none());
    }

    #[test]
    fn test_custom_group_members() {
        let mut group = ExtensionGroup::new("front", "audio_group")
            .with_extensions(vec![AddonInstancePair::new("vad", "vad")]);
        group.bind("app", "g1");

        assert!(!group.is_default());
        assert!(!group.is_graph_driven());
        assert_eq!(group.graph_id(), Some("g1"));
        assert_eq!(group.extension_addon_and_instance_name_pairs().len(), 1);
    }
}
