//! App: hosts the addon registry and one engine per running graph.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::addon::AddonRegistry;
use crate::config::RuntimeConfig;
use crate::engine::{Engine, EngineHandle};
use crate::error::{Error, Result};
use crate::graph::GraphDefinition;
use crate::msg::{Msg, StartGraphCmd};

/// Identity of the hosting app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub uri: String,
    pub base_dir: String,
}

impl AppInfo {
    pub fn new(uri: impl Into<String>, base_dir: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            base_dir: base_dir.into(),
        }
    }
}

pub struct App {
    info: Arc<AppInfo>,
    addons: Arc<AddonRegistry>,
    engines: Mutex<HashMap<String, EngineHandle>>,
    close_timeout: Option<Duration>,
}

impl App {
    pub fn new(config: &RuntimeConfig, addons: AddonRegistry) -> Self {
        Self {
            info: Arc::new(AppInfo::new(config.app.uri.as_str(), config.app.base_dir.as_str())),
            addons: Arc::new(addons),
            engines: Mutex::new(HashMap::new()),
            close_timeout: config.close_timeout(),
        }
    }

    pub fn uri(&self) -> &str {
        &self.info.uri
    }

    pub fn base_dir(&self) -> &str {
        &self.info.base_dir
    }

    pub fn addons(&self) -> &AddonRegistry {
        &self.addons
    }

    /// Start an unnamed graph; returns its generated graph id.
    pub async fn start_graph(&self, graph: &GraphDefinition) -> Result<String> {
        self.start_named_graph("", graph).await
    }

    pub async fn start_named_graph(&self, name: &str, graph: &GraphDefinition) -> Result<String> {
        let graph_id = Uuid::new_v4().to_string();
        let cmd = StartGraphCmd::from_definition(graph, &self.info.uri, graph_id.as_str())?
            .with_graph_name(name);

        let handle = Engine::start(self.info.clone(), self.addons.clone(), cmd).await?;
        info!(graph_id = %graph_id, graph_name = %name, "Graph starting");

        let mut engines = self.engines.lock().await;
        engines.retain(|_, h| !h.is_closed());
        engines.insert(graph_id.clone(), handle);
        Ok(graph_id)
    }

    pub async fn graph(&self, graph_id: &str) -> Option<EngineHandle> {
        self.engines.lock().await.get(graph_id).cloned()
    }

    /// Ids of graphs that have not closed yet. Graphs that closed on their
    /// own are forgotten.
    pub async fn running_graphs(&self) -> Vec<String> {
        let mut engines = self.engines.lock().await;
        engines.retain(|_, h| !h.is_closed());
        let mut ids: Vec<String> = engines.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Send a message into a running graph.
    pub async fn send(&self, graph_id: &str, msg: Msg) -> Result<()> {
        let handle = self
            .graph(graph_id)
            .await
            .ok_or_else(|| Error::GraphNotFound(graph_id.to_string()))?;
        handle.send(msg)
    }

    /// Close one graph and wait for it.
    pub async fn close_graph(&self, graph_id: &str) -> Result<()> {
        let handle = self
            .engines
            .lock()
            .await
            .remove(graph_id)
            .ok_or_else(|| Error::GraphNotFound(graph_id.to_string()))?;
        handle.close();
        self.wait(&handle).await
    }

    /// Close every graph and wait for all of them.
    pub async fn close(&self) -> Result<()> {
        let handles: Vec<EngineHandle> = self.engines.lock().await.drain().map(|(_, h)| h).collect();
        for handle in &handles {
            handle.close();
        }

        let mut result = Ok(());
        for handle in &handles {
            if let Err(e) = self.wait(handle).await {
                warn!(graph_id = %handle.graph_id(), error = %e, "Graph did not close");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        info!(uri = %self.info.uri, graphs = handles.len(), "App closed");
        result
    }

    async fn wait(&self, handle: &EngineHandle) -> Result<()> {
        match self.close_timeout {
            Some(timeout) => handle.wait_closed_timeout(timeout).await,
            None => {
                handle.wait_closed().await;
                Ok(())
            }
        }
    }
}
