//! Engine: one running graph.
//!
//! The engine is an actor. Its task owns the [`ExtensionContext`] and is the
//! only code that mutates it; extension threads, group-creation futures and
//! the outside world all reach it through the engine mailbox.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info};

use crate::addon::AddonRegistry;
use crate::app::AppInfo;
use crate::error::{Error, Result};
use crate::extension_context::ExtensionContext;
use crate::extension_group::ExtensionGroup;
use crate::extension_thread::ExtensionThreadId;
use crate::msg::{Msg, StartGraphCmd};

/// Messages drained by the engine task.
#[derive(Debug)]
pub(crate) enum EngineMsg {
    ExtensionGroupCreated(Result<ExtensionGroup>),
    ExtensionThreadClosed(ExtensionThreadId),
    Route { msg: Msg },
    Close,
}

/// Engine-wide environment shared with whoever needs to know whether the
/// graph is still alive.
#[derive(Debug, Clone, Default)]
pub struct EngineEnv {
    closed: Arc<AtomicBool>,
}

impl EngineEnv {
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// What the extension context and its threads need from their engine.
#[derive(Clone)]
pub struct EngineLink {
    pub(crate) graph_id: String,
    pub(crate) graph_name: Option<String>,
    pub(crate) app: Arc<AppInfo>,
    pub(crate) original_start_graph_cmd: Arc<StartGraphCmd>,
    pub(crate) addons: Arc<AddonRegistry>,
    pub(crate) mailbox: mpsc::UnboundedSender<EngineMsg>,
    pub(crate) env: EngineEnv,
}

impl EngineLink {
    pub fn graph_id(&self) -> &str {
        &self.graph_id
    }

    pub fn graph_name(&self) -> Option<&str> {
        self.graph_name.as_deref()
    }

    pub fn app(&self) -> &AppInfo {
        &self.app
    }

    pub fn original_start_graph_cmd(&self) -> &StartGraphCmd {
        &self.original_start_graph_cmd
    }

    pub fn env(&self) -> &EngineEnv {
        &self.env
    }
}

impl std::fmt::Debug for EngineLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineLink")
            .field("graph_id", &self.graph_id)
            .field("graph_name", &self.graph_name)
            .field("app_uri", &self.app.uri)
            .finish()
    }
}

pub struct Engine {
    context: ExtensionContext,
    mailbox: mpsc::UnboundedReceiver<EngineMsg>,
}

impl Engine {
    /// Start a graph and return once its extension groups have been
    /// requested.
    ///
    /// Fails when a group addon cannot be resolved; the engine then closes
    /// whatever it already created on its own.
    pub async fn start(
        app: Arc<AppInfo>,
        addons: Arc<AddonRegistry>,
        cmd: StartGraphCmd,
    ) -> Result<EngineHandle> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);

        let link = EngineLink {
            graph_id: cmd.graph_id().to_string(),
            graph_name: cmd.graph_name().map(String::from),
            app: app.clone(),
            original_start_graph_cmd: Arc::new(cmd),
            addons,
            mailbox: tx.clone(),
            env: EngineEnv::default(),
        };

        let handle = EngineHandle {
            graph_id: link.graph_id.clone(),
            graph_name: link.graph_name.clone(),
            app_uri: app.uri.clone(),
            mailbox: tx,
            closed: closed_rx,
        };

        let mut context = ExtensionContext::new(link);
        context.set_on_closed(move |ctx| {
            debug!(graph_id = %ctx.engine().graph_id, "Engine closed");
            let _ = closed_tx.send(true);
        });

        let engine = Engine {
            context,
            mailbox: rx,
        };
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(engine.run(ready_tx));

        match ready_rx.await {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Closed(format!(
                "engine for graph {} stopped during startup",
                handle.graph_id
            ))),
        }
    }

    async fn run(mut self, ready: oneshot::Sender<Result<()>>) {
        let started = self.context.start_extension_group();
        let failed = started.is_err();
        let _ = ready.send(started);
        if failed {
            self.context.close();
        }

        while !self.context.is_closed() {
            let Some(msg) = self.mailbox.recv().await else {
                break;
            };
            self.handle(msg);
        }

        info!(graph_id = %self.context.engine().graph_id, "Engine stopped");
    }

    fn handle(&mut self, msg: EngineMsg) {
        match msg {
            EngineMsg::ExtensionGroupCreated(Ok(group)) => {
                self.context.on_extension_group_created(group);
            }
            EngineMsg::ExtensionGroupCreated(Err(e)) => {
                error!(
                    graph_id = %self.context.engine().graph_id,
                    error = %e,
                    "Extension group creation failed, closing graph"
                );
                self.context.close();
            }
            EngineMsg::ExtensionThreadClosed(id) => {
                self.context.on_extension_thread_closed(id);
            }
            EngineMsg::Route { msg } => self.context.dispatch(msg),
            EngineMsg::Close => self.context.close(),
        }
    }
}

/// Handle to a running engine, held by the app.
#[derive(Clone)]
pub struct EngineHandle {
    graph_id: String,
    graph_name: Option<String>,
    app_uri: String,
    mailbox: mpsc::UnboundedSender<EngineMsg>,
    closed: watch::Receiver<bool>,
}

impl EngineHandle {
    pub fn graph_id(&self) -> &str {
        &self.graph_id
    }

    pub fn graph_name(&self) -> Option<&str> {
        self.graph_name.as_deref()
    }

    /// Inject a message into the graph. It must name its destinations.
    pub fn send(&self, mut msg: Msg) -> Result<()> {
        if msg.dest().is_empty() {
            return Err(Error::InvalidArgument(format!(
                "'{}' has no destination",
                msg.name()
            )));
        }
        msg.resolve_dest(&self.app_uri, &self.graph_id);
        self.mailbox
            .send(EngineMsg::Route { msg })
            .map_err(|_| Error::Closed(format!("graph {} is closed", self.graph_id)))
    }

    /// Request shutdown. Closing an engine that is already gone is a no-op.
    pub fn close(&self) {
        let _ = self.mailbox.send(EngineMsg::Close);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait until every extension thread of the graph has stopped.
    pub async fn wait_closed(&self) {
        let mut closed = self.closed.clone();
        // An error means the engine task is gone, which also means closed.
        let _ = closed.wait_for(|closed| *closed).await;
    }

    pub async fn wait_closed_timeout(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.wait_closed())
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "graph {} did not close within {:?}",
                    self.graph_id, timeout
                ))
            })
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("graph_id", &self.graph_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
