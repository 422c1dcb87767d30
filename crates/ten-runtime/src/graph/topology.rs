//! Frozen view of a started graph.
//!
//! A `GraphTopology` is built once from the start-graph command, installed
//! into the extension context at the readiness barrier, and shared read-only
//! (through `Arc`) with every extension thread. Nothing mutates it after
//! construction, so lookups are safe from any thread.

use std::sync::Arc;

use crate::graph::info::{ExtensionGroupInfo, ExtensionInfo};
use crate::graph::routing::RoutingTable;

#[derive(Debug, Clone, Default)]
pub struct GraphTopology {
    extension_groups: Vec<Arc<ExtensionGroupInfo>>,
    extensions: Vec<Arc<ExtensionInfo>>,
    routes: RoutingTable,
}

impl GraphTopology {
    pub fn new(
        extension_groups: Vec<Arc<ExtensionGroupInfo>>,
        extensions: Vec<Arc<ExtensionInfo>>,
        routes: RoutingTable,
    ) -> Self {
        Self {
            extension_groups,
            extensions,
            routes,
        }
    }

    pub fn extension_groups(&self) -> &[Arc<ExtensionGroupInfo>] {
        &self.extension_groups
    }

    pub fn extensions(&self) -> &[Arc<ExtensionInfo>] {
        &self.extensions
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    pub fn is_empty(&self) -> bool {
        self.extension_groups.is_empty() && self.extensions.is_empty()
    }

    /// First extension matching every given key; `None` keys match anything.
    pub fn extension_info_by_name(
        &self,
        app_uri: Option<&str>,
        graph_id: Option<&str>,
        extension_name: Option<&str>,
    ) -> Option<&Arc<ExtensionInfo>> {
        self.extensions.iter().find(|info| {
            app_uri.map_or(true, |uri| info.loc.app_uri == uri)
                && graph_id.map_or(true, |id| info.loc.graph_id == id)
                && extension_name.map_or(true, |name| info.name() == name)
        })
    }

    pub fn extension_group_info_by_name(
        &self,
        app_uri: &str,
        extension_group_name: &str,
    ) -> Option<&Arc<ExtensionGroupInfo>> {
        self.extension_groups.iter().find(|info| {
            info.loc.app_uri == app_uri && info.extension_group_instance_name == extension_group_name
        })
    }

    pub fn extension_group_name(
        &self,
        app_uri: Option<&str>,
        graph_id: Option<&str>,
        extension_name: Option<&str>,
    ) -> Option<&str> {
        self.extension_info_by_name(app_uri, graph_id, extension_name)
            .map(|info| info.extension_group_name.as_str())
    }
}
