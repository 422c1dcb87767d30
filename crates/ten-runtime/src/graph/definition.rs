//! Declarative graph description (`nodes` + `connections`).
//!
//! Only the subset of the graph grammar the runtime consumes is modeled:
//! extension and extension-group nodes and cmd/data connections.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A graph as written in `property.json` or sent with a start-graph request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDefinition {
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub connections: Vec<GraphConnection>,
}

/// A node of the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphNode {
    Extension {
        name: String,
        addon: String,
        /// Group hosting the extension; defaults to a group named after the
        /// extension.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extension_group: Option<String>,
        /// Owning app; defaults to the local app.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        property: Option<serde_json::Value>,
    },
    ExtensionGroup {
        name: String,
        addon: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app: Option<String>,
    },
}

/// Outgoing flows of one extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    pub extension: String,
    #[serde(default)]
    pub cmd: Vec<MsgFlow>,
    #[serde(default)]
    pub data: Vec<MsgFlow>,
}

/// Where messages of one name go.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgFlow {
    pub name: String,
    #[serde(default)]
    pub dest: Vec<FlowDest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    pub extension: String,
}

impl GraphDefinition {
    pub fn from_json(json: &str) -> Result<Self> {
        let graph: GraphDefinition = serde_json::from_str(json)?;
        graph.validate()?;
        Ok(graph)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Extension nodes of the graph.
    pub fn extensions(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes
            .iter()
            .filter(|node| matches!(node, GraphNode::Extension { .. }))
    }

    /// Checks that do not depend on the hosting app.
    pub fn validate(&self) -> Result<()> {
        for node in &self.nodes {
            let (kind, name, addon) = match node {
                GraphNode::Extension { name, addon, .. } => ("extension", name, addon),
                GraphNode::ExtensionGroup { name, addon, .. } => ("extension_group", name, addon),
            };
            if name.is_empty() || addon.is_empty() {
                return Err(Error::InvalidGraph(format!(
                    "{} node needs both 'name' and 'addon'",
                    kind
                )));
            }
        }
        Ok(())
    }

    /// Full validation for a graph hosted by the app at `local_app_uri`.
    ///
    /// Nodes and connection endpoints without an `app` belong to the local
    /// app, so identity is checked on `(app_uri, name)` after defaulting.
    pub fn validate_for_app(&self, local_app_uri: &str) -> Result<()> {
        self.validate()?;

        let app_of = |app: &Option<String>| app.as_deref().unwrap_or(local_app_uri).to_string();
        let mut extension_names = HashSet::new();
        let mut group_names = HashSet::new();

        for node in &self.nodes {
            match node {
                GraphNode::Extension { name, app, .. } => {
                    if !extension_names.insert((app_of(app), name.as_str())) {
                        return Err(Error::InvalidGraph(format!(
                            "duplicate extension '{}'",
                            name
                        )));
                    }
                }
                GraphNode::ExtensionGroup { name, app, .. } => {
                    if !group_names.insert((app_of(app), name.as_str())) {
                        return Err(Error::InvalidGraph(format!(
                            "duplicate extension group '{}'",
                            name
                        )));
                    }
                }
            }
        }

        for conn in &self.connections {
            if !extension_names.contains(&(app_of(&conn.app), conn.extension.as_str())) {
                return Err(Error::InvalidGraph(format!(
                    "connection source '{}' is not a node of the graph",
                    conn.extension
                )));
            }
            for flow in conn.cmd.iter().chain(conn.data.iter()) {
                for dest in &flow.dest {
                    if !extension_names.contains(&(app_of(&dest.app), dest.extension.as_str())) {
                        return Err(Error::InvalidGraph(format!(
                            "destination '{}' of '{}' is not a node of the graph",
                            dest.extension, flow.name
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}
