//! The extension trait and the environment handed to every extension.
//!
//! Extensions live on the OS thread of their extension group and are only
//! ever touched from that thread. Everything they need from the rest of the
//! graph goes through their [`TenEnv`]: reads of the frozen topology and
//! messages posted to the engine's mailbox.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::engine::EngineMsg;
use crate::error::{Error, Result};
use crate::graph::{ExtensionInfo, GraphTopology};
use crate::loc::Loc;
use crate::msg::{Msg, MsgType};

/// A pluggable unit of logic hosted by an extension group.
///
/// Every callback has a no-op default; lifecycle errors are logged by the
/// hosting thread and do not stop the rest of the group.
#[async_trait]
pub trait Extension: Send {
    async fn on_init(&mut self, _env: &mut TenEnv) -> Result<()> {
        Ok(())
    }

    async fn on_start(&mut self, _env: &mut TenEnv) -> Result<()> {
        Ok(())
    }

    async fn on_cmd(&mut self, _env: &mut TenEnv, _cmd: Msg) -> Result<()> {
        Ok(())
    }

    async fn on_data(&mut self, _env: &mut TenEnv, _data: Msg) -> Result<()> {
        Ok(())
    }

    async fn on_stop(&mut self, _env: &mut TenEnv) -> Result<()> {
        Ok(())
    }

    async fn on_deinit(&mut self, _env: &mut TenEnv) -> Result<()> {
        Ok(())
    }
}

/// Per-extension handle onto the runtime.
#[derive(Clone)]
pub struct TenEnv {
    loc: Loc,
    extension_group: String,
    property: serde_json::Value,
    topology: Arc<GraphTopology>,
    engine: mpsc::UnboundedSender<EngineMsg>,
}

impl TenEnv {
    pub(crate) fn new(
        loc: Loc,
        extension_group: impl Into<String>,
        topology: Arc<GraphTopology>,
        engine: mpsc::UnboundedSender<EngineMsg>,
    ) -> Self {
        let property = topology
            .extension_info_by_name(
                Some(&loc.app_uri),
                Some(&loc.graph_id),
                loc.extension_name(),
            )
            .map(|info| info.property.clone())
            .unwrap_or(serde_json::Value::Null);

        Self {
            loc,
            extension_group: extension_group.into(),
            property,
            topology,
            engine,
        }
    }

    pub fn extension_name(&self) -> &str {
        self.loc.extension_name().unwrap_or_default()
    }

    pub fn extension_group_name(&self) -> &str {
        &self.extension_group
    }

    pub fn graph_id(&self) -> &str {
        &self.loc.graph_id
    }

    pub fn app_uri(&self) -> &str {
        &self.loc.app_uri
    }

    pub fn loc(&self) -> &Loc {
        &self.loc
    }

    /// The `property` object declared for this extension in the graph.
    pub fn property(&self) -> &serde_json::Value {
        &self.property
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.property.get(key).and_then(|v| v.as_str())
    }

    pub fn property_u64(&self, key: &str) -> Option<u64> {
        self.property.get(key).and_then(|v| v.as_u64())
    }

    /// Look up another extension of the running graph.
    pub fn extension_info(&self, extension_name: &str) -> Option<&Arc<ExtensionInfo>> {
        self.topology.extension_info_by_name(
            Some(&self.loc.app_uri),
            Some(&self.loc.graph_id),
            Some(extension_name),
        )
    }

    pub fn topology(&self) -> &GraphTopology {
        &self.topology
    }

    /// Send a message.
    ///
    /// Without explicit destinations the graph's connections decide where it
    /// goes; a message nothing is connected to is rejected.
    pub fn send_msg(&self, mut msg: Msg) -> Result<()> {
        msg.set_src(self.loc.clone());

        if msg.dest().is_empty() {
            let dests = self
                .topology
                .routes()
                .destinations(&self.loc, msg.kind(), msg.name());
            if dests.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "no destination for {} '{}' from '{}'",
                    msg.kind(),
                    msg.name(),
                    self.extension_name()
                )));
            }
            msg.set_dest(dests.to_vec());
        } else {
            msg.resolve_dest(&self.loc.app_uri, &self.loc.graph_id);
        }

        self.engine
            .send(EngineMsg::Route { msg })
            .map_err(|_| Error::Closed(format!("graph {} is gone", self.loc.graph_id)))
    }

    pub fn send_cmd(&self, cmd: Msg) -> Result<()> {
        if cmd.kind() != MsgType::Cmd {
            return Err(Error::InvalidArgument(format!("'{}' is not a cmd", cmd.name())));
        }
        self.send_msg(cmd)
    }

    pub fn send_data(&self, data: Msg) -> Result<()> {
        if data.kind() != MsgType::Data {
            return Err(Error::InvalidArgument(format!("'{}' is not data", data.name())));
        }
        self.send_msg(data)
    }

    /// Ask the engine to tear the whole graph down.
    pub fn close_graph(&self) -> Result<()> {
        self.engine
            .send(EngineMsg::Close)
            .map_err(|_| Error::Closed(format!("graph {} is gone", self.loc.graph_id)))
    }
}

impl std::fmt::Debug for TenEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenEnv")
            .field("loc", &self.loc)
            .field("extension_group", &self.extension_group)
            .finish()
    }
}
