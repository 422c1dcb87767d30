//! Messages exchanged between extensions.

pub mod start_graph;

pub use start_graph::StartGraphCmd;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::loc::Loc;

/// Kind of a routed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MsgType {
    Cmd,
    Data,
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cmd => write!(f, "cmd"),
            Self::Data => write!(f, "data"),
        }
    }
}

/// A command or data message.
///
/// Destinations are either set explicitly by the sender or resolved from the
/// graph's connections when the message leaves the extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Msg {
    kind: MsgType,
    name: String,
    #[serde(default)]
    src: Loc,
    #[serde(default)]
    dest: Vec<Loc>,
    #[serde(default)]
    properties: serde_json::Map<String, serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl Msg {
    fn new(kind: MsgType, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            src: Loc::default(),
            dest: Vec::new(),
            properties: serde_json::Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn cmd(name: impl Into<String>) -> Self {
        Self::new(MsgType::Cmd, name)
    }

    pub fn data(name: impl Into<String>) -> Self {
        Self::new(MsgType::Data, name)
    }

    pub fn kind(&self) -> MsgType {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn src(&self) -> &Loc {
        &self.src
    }

    pub fn dest(&self) -> &[Loc] {
        &self.dest
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Add an explicit destination extension in the sender's app and graph.
    pub fn with_dest(mut self, extension: impl Into<String>) -> Self {
        self.dest.push(Loc::extension(extension));
        self
    }

    pub fn with_dest_loc(mut self, loc: Loc) -> Self {
        self.dest.push(loc);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }

    pub fn properties(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.properties
    }

    pub(crate) fn set_src(&mut self, src: Loc) {
        self.src = src;
    }

    pub(crate) fn set_dest(&mut self, dest: Vec<Loc>) {
        self.dest = dest;
    }

    /// Fill empty app/graph fields of every destination.
    pub(crate) fn resolve_dest(&mut self, app_uri: &str, graph_id: &str) {
        for loc in &mut self.dest {
            loc.resolve_against(app_uri, graph_id);
        }
    }
}
