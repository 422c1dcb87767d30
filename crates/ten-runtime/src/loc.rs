//! Locations of graph participants.

use serde::{Deserialize, Serialize};

/// Address of an extension (or of a whole graph when `extension` is `None`).
///
/// Empty `app_uri` / `graph_id` mean "the same app / graph as the sender" and
/// are filled in before a message leaves its extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Loc {
    #[serde(default)]
    pub app_uri: String,
    #[serde(default)]
    pub graph_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

impl Loc {
    pub fn new(app_uri: impl Into<String>, graph_id: impl Into<String>) -> Self {
        Self {
            app_uri: app_uri.into(),
            graph_id: graph_id.into(),
            extension: None,
        }
    }

    /// A location naming only the extension.
    pub fn extension(name: impl Into<String>) -> Self {
        Self {
            extension: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_extension(mut self, name: impl Into<String>) -> Self {
        self.extension = Some(name.into());
        self
    }

    pub fn extension_name(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    /// Fill empty app/graph fields with the given ones.
    pub fn resolve_against(&mut self, app_uri: &str, graph_id: &str) {
        if self.app_uri.is_empty() {
            self.app_uri = app_uri.to_string();
        }
        if self.graph_id.is_empty() {
            self.graph_id = graph_id.to_string();
        }
    }
}

impl std::fmt::Display for Loc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.app_uri, self.graph_id)?;
        if let Some(ext) = &self.extension {
            write!(f, "/{}", ext)?;
        }
        Ok(())
    }
}
