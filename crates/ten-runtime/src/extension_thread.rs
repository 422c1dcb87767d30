//! Extension threads.
//!
//! Every extension group runs on its own OS thread. The thread owns a
//! current-thread tokio runtime, the extensions of its group, and the
//! receiving end of its mailbox; nothing else ever touches them. The engine
//! keeps an [`ExtensionThread`] handle per group and talks to the thread
//! only through [`ExtensionThreadMsg`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::engine::{EngineLink, EngineMsg};
use crate::error::{Error, Result};
use crate::extension::{Extension, TenEnv};
use crate::extension_context::ExtensionContext;
use crate::extension_group::ExtensionGroup;
use crate::graph::GraphTopology;
use crate::loc::Loc;
use crate::msg::{Msg, MsgType};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an extension thread within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtensionThreadId(u64);

impl ExtensionThreadId {
    fn next() -> Self {
        Self(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ExtensionThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ext-thread-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionThreadState {
    /// Handle exists, not bound to anything yet
    Created,
    /// Bound to a context and a group, OS thread not spawned
    Attached,
    Running,
    /// Close requested, waiting for the thread to report back
    Closing,
    Closed,
}

/// Messages drained by the extension thread.
#[derive(Debug)]
pub(crate) enum ExtensionThreadMsg {
    Deliver { extension: String, msg: Msg },
    Close,
}

/// Engine-side handle of one extension thread.
pub struct ExtensionThread {
    id: ExtensionThreadId,
    state: ExtensionThreadState,
    group_name: String,
    group: Option<ExtensionGroup>,
    engine: Option<EngineLink>,
    mailbox: Option<mpsc::UnboundedSender<ExtensionThreadMsg>>,
    handle: Option<JoinHandle<()>>,
    created_at: DateTime<Utc>,
}

impl ExtensionThread {
    pub fn new() -> Self {
        Self {
            id: ExtensionThreadId::next(),
            state: ExtensionThreadState::Created,
            group_name: String::new(),
            group: None,
            engine: None,
            mailbox: None,
            handle: None,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> ExtensionThreadId {
        self.id
    }

    pub fn state(&self) -> ExtensionThreadState {
        self.state
    }

    pub fn extension_group_name(&self) -> &str {
        &self.group_name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The hosted group, until the thread has been started.
    pub fn group(&self) -> Option<&ExtensionGroup> {
        self.group.as_ref()
    }

    pub(crate) fn group_mut(&mut self) -> Option<&mut ExtensionGroup> {
        self.group.as_mut()
    }

    pub fn attach_to_context_and_group(
        &mut self,
        context: &ExtensionContext,
        group: ExtensionGroup,
    ) {
        self.group_name = group.name().to_string();
        self.group = Some(group);
        self.engine = Some(context.engine().clone());
        self.state = ExtensionThreadState::Attached;
    }

    /// Spawn the OS thread and run the group's extensions on it.
    pub fn start(&mut self, topology: Arc<GraphTopology>) -> Result<()> {
        if self.state != ExtensionThreadState::Attached {
            return Err(Error::InvalidState(format!(
                "{} cannot start from {:?}",
                self.id, self.state
            )));
        }
        let (Some(group), Some(engine)) = (self.group.take(), self.engine.clone()) else {
            return Err(Error::InvalidState(format!("{} is not attached", self.id)));
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let runner = Runner {
            id: self.id,
            group,
            engine,
            topology,
        };
        let spawned = std::thread::Builder::new()
            .name(format!("ten-ext-{}", self.group_name))
            .spawn(move || runner.run(rx));

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                self.mailbox = Some(tx);
                self.state = ExtensionThreadState::Running;
                Ok(())
            }
            Err(e) => {
                // The runner went down with the failed spawn; keep the handle
                // attached so closing still reports back to the engine.
                error!(
                    extension_group = %self.group_name,
                    error = %e,
                    "Failed to spawn extension thread"
                );
                Err(Error::Io(e))
            }
        }
    }

    /// Ask the thread to stop its extensions and exit.
    ///
    /// The engine learns about completion through
    /// [`EngineMsg::ExtensionThreadClosed`], whether or not the thread ever
    /// ran.
    pub fn close(&mut self) {
        match self.state {
            ExtensionThreadState::Running => {
                if let Some(mailbox) = &self.mailbox {
                    // A failed send means the runner already exited and
                    // posted its closed notification.
                    let _ = mailbox.send(ExtensionThreadMsg::Close);
                }
                self.state = ExtensionThreadState::Closing;
            }
            ExtensionThreadState::Created | ExtensionThreadState::Attached => {
                match &self.engine {
                    Some(engine) => {
                        let _ = engine.mailbox.send(EngineMsg::ExtensionThreadClosed(self.id));
                    }
                    None => warn!(thread = %self.id, "Closing a thread that was never attached"),
                }
                self.state = ExtensionThreadState::Closing;
            }
            ExtensionThreadState::Closing | ExtensionThreadState::Closed => {}
        }
    }

    pub(crate) fn deliver(&self, extension: String, msg: Msg) -> bool {
        match &self.mailbox {
            Some(mailbox) => mailbox
                .send(ExtensionThreadMsg::Deliver { extension, msg })
                .is_ok(),
            None => false,
        }
    }

    /// Reap the OS thread once it has reported closure.
    pub(crate) fn join(&mut self) {
        self.mailbox = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(extension_group = %self.group_name, "Extension thread panicked");
            }
        }
        self.state = ExtensionThreadState::Closed;
    }
}

impl Default for ExtensionThread {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExtensionThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionThread")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("group", &self.group_name)
            .finish()
    }
}

struct Hosted {
    name: String,
    extension: Box<dyn Extension>,
    env: TenEnv,
}

/// Everything that moves onto the OS thread.
struct Runner {
    id: ExtensionThreadId,
    group: ExtensionGroup,
    engine: EngineLink,
    topology: Arc<GraphTopology>,
}

impl Runner {
    fn run(self, mailbox: mpsc::UnboundedReceiver<ExtensionThreadMsg>) {
        let id = self.id;
        let engine = self.engine.mailbox.clone();

        match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => {
                rt.block_on(self.run_extensions(mailbox));
                drop(rt);
            }
            Err(e) => {
                error!(thread = %id, error = %e, "Failed to build extension thread runtime");
            }
        }

        let _ = engine.send(EngineMsg::ExtensionThreadClosed(id));
    }

    async fn run_extensions(self, mut mailbox: mpsc::UnboundedReceiver<ExtensionThreadMsg>) {
        let group_name = self.group.name().to_string();
        let mut hosted = self.create_extensions();

        info!(
            graph_id = %self.engine.graph_id,
            extension_group = %group_name,
            extensions = hosted.len(),
            "Extension thread started"
        );

        for h in hosted.iter_mut() {
            if let Err(e) = h.extension.on_init(&mut h.env).await {
                warn!(extension = %h.name, error = %e, "on_init failed");
            }
        }
        for h in hosted.iter_mut() {
            if let Err(e) = h.extension.on_start(&mut h.env).await {
                warn!(extension = %h.name, error = %e, "on_start failed");
            }
        }

        while let Some(msg) = mailbox.recv().await {
            match msg {
                ExtensionThreadMsg::Deliver { extension, msg } => {
                    let Some(h) = hosted.iter_mut().find(|h| h.name == extension) else {
                        warn!(
                            extension_group = %group_name,
                            extension = %extension,
                            msg = %msg.name(),
                            "Message for an extension this group does not host"
                        );
                        continue;
                    };
                    let result = match msg.kind() {
                        MsgType::Cmd => h.extension.on_cmd(&mut h.env, msg).await,
                        MsgType::Data => h.extension.on_data(&mut h.env, msg).await,
                    };
                    if let Err(e) = result {
                        warn!(extension = %h.name, error = %e, "Message handler failed");
                    }
                }
                ExtensionThreadMsg::Close => break,
            }
        }

        for h in hosted.iter_mut().rev() {
            if let Err(e) = h.extension.on_stop(&mut h.env).await {
                warn!(extension = %h.name, error = %e, "on_stop failed");
            }
        }
        for h in hosted.iter_mut().rev() {
            if let Err(e) = h.extension.on_deinit(&mut h.env).await {
                warn!(extension = %h.name, error = %e, "on_deinit failed");
            }
        }

        debug!(extension_group = %group_name, "Extension thread stopped");
    }

    fn create_extensions(&self) -> Vec<Hosted> {
        let app_uri = self
            .group
            .app_uri()
            .unwrap_or(self.engine.app.uri.as_str())
            .to_string();
        let graph_id = self.engine.graph_id.as_str();

        let mut hosted = Vec::new();
        for pair in self.group.extension_addon_and_instance_name_pairs() {
            match self
                .engine
                .addons
                .create_extension(&pair.addon_name, &pair.instance_name)
            {
                Ok(extension) => {
                    let env = TenEnv::new(
                        Loc::new(app_uri.as_str(), graph_id).with_extension(pair.instance_name.as_str()),
                        self.group.name(),
                        self.topology.clone(),
                        self.engine.mailbox.clone(),
                    );
                    hosted.push(Hosted {
                        name: pair.instance_name.clone(),
                        extension,
                        env,
                    });
                }
                Err(e) => {
                    error!(
                        extension_group = %self.group.name(),
                        extension = %pair.instance_name,
                        addon = %pair.addon_name,
                        error = %e,
                        "Failed to create extension"
                    );
                }
            }
        }
        hosted
    }
}
