//! The start-graph command: the full declared topology of one graph instance.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::graph::{
    AddonInstancePair, ExtensionGroupInfo, ExtensionInfo, GraphDefinition, GraphNode,
    GraphTopology, RoutingTable, DEFAULT_EXTENSION_GROUP,
};
use crate::loc::Loc;

/// Parsed start-graph command.
///
/// The engine keeps it for the whole startup sequence: extension-group
/// creation completes asynchronously and every completion re-reads the
/// declared topology.
#[derive(Debug, Clone)]
pub struct StartGraphCmd {
    dest: Loc,
    graph_name: Option<String>,
    topology: GraphTopology,
}

impl StartGraphCmd {
    /// Build the command for `graph_id` hosted by the app at `local_app_uri`.
    ///
    /// Extensions without an explicit group get a group named after
    /// themselves; groups referenced only by extensions are served by the
    /// default extension group addon.
    pub fn from_definition(
        graph: &GraphDefinition,
        local_app_uri: &str,
        graph_id: impl Into<String>,
    ) -> Result<Self> {
        graph.validate_for_app(local_app_uri)?;

        let graph_id = graph_id.into();
        let mut groups: Vec<Arc<ExtensionGroupInfo>> = Vec::new();
        let mut group_index: HashMap<(String, String), usize> = HashMap::new();
        let mut extensions = Vec::new();

        for node in &graph.nodes {
            if let GraphNode::ExtensionGroup { name, addon, app } = node {
                let app_uri = app.as_deref().unwrap_or(local_app_uri);
                group_index.insert((app_uri.to_string(), name.clone()), groups.len());
                groups.push(Arc::new(ExtensionGroupInfo::new(
                    Loc::new(app_uri, graph_id.as_str()),
                    name.as_str(),
                    addon.as_str(),
                )));
            }
        }

        for node in &graph.nodes {
            if let GraphNode::Extension {
                name,
                addon,
                extension_group,
                app,
                property,
            } = node
            {
                let app_uri = app.as_deref().unwrap_or(local_app_uri);
                let group_name = extension_group.as_deref().unwrap_or(name.as_str());

                let key = (app_uri.to_string(), group_name.to_string());
                if !group_index.contains_key(&key) {
                    group_index.insert(key, groups.len());
                    groups.push(Arc::new(ExtensionGroupInfo::new(
                        Loc::new(app_uri, graph_id.as_str()),
                        group_name,
                        DEFAULT_EXTENSION_GROUP,
                    )));
                }

                let info = ExtensionInfo::new(
                    Loc::new(app_uri, graph_id.as_str()).with_extension(name.as_str()),
                    group_name,
                    addon.as_str(),
                )
                .with_property(property.clone().unwrap_or(serde_json::Value::Null));
                extensions.push(Arc::new(info));
            }
        }

        let routes = RoutingTable::from_connections(&graph.connections, local_app_uri, &graph_id);

        Ok(Self {
            dest: Loc::new(local_app_uri, graph_id),
            graph_name: None,
            topology: GraphTopology::new(groups, extensions, routes),
        })
    }

    pub fn with_graph_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.graph_name = if name.is_empty() { None } else { Some(name) };
        self
    }

    /// App and graph this command starts.
    pub fn dest(&self) -> &Loc {
        &self.dest
    }

    pub fn graph_id(&self) -> &str {
        &self.dest.graph_id
    }

    pub fn graph_name(&self) -> Option<&str> {
        self.graph_name.as_deref()
    }

    pub fn extension_groups_info(&self) -> &[Arc<ExtensionGroupInfo>] {
        self.topology.extension_groups()
    }

    pub fn extensions_info(&self) -> &[Arc<ExtensionInfo>] {
        self.topology.extensions()
    }

    /// Number of declared groups hosted by `app_uri`.
    pub fn extension_groups_cnt_of_app(&self, app_uri: &str) -> usize {
        self.extension_groups_info()
            .iter()
            .filter(|info| info.loc.app_uri == app_uri)
            .count()
    }

    /// The extensions a graph-driven group must instantiate.
    pub fn extension_addon_and_instance_name_pairs_of_group(
        &self,
        app_uri: &str,
        graph_id: &str,
        extension_group_name: &str,
    ) -> Vec<AddonInstancePair> {
        self.extensions_info()
            .iter()
            .filter(|info| {
                info.loc.app_uri == app_uri
                    && info.loc.graph_id == graph_id
                    && info.extension_group_name == extension_group_name
            })
            .map(|info| AddonInstancePair::new(info.extension_addon_name.as_str(), info.name()))
            .collect()
    }

    /// Snapshot of the tables to install at the readiness barrier.
    pub fn topology(&self) -> GraphTopology {
        self.topology.clone()
    }
}
