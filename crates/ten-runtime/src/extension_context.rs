//! Extension context: lifecycle orchestration of one running graph.
//!
//! The context is owned by its engine's actor task and is only mutated from
//! there. It
//!
//! - asks the addon registry for every extension group hosted by this app,
//! - wraps each created group in an [`ExtensionThread`],
//! - installs the graph's topology and starts all threads once every local
//!   group exists (the readiness barrier),
//! - closes all threads and counts their closed notifications on shutdown.
//!
//! Completions and closed notifications may arrive in any order.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::engine::{EngineLink, EngineMsg};
use crate::error::{Error, Result};
use crate::extension_group::ExtensionGroup;
use crate::extension_thread::{ExtensionThread, ExtensionThreadId};
use crate::graph::{ExtensionGroupInfo, ExtensionInfo, GraphTopology};
use crate::msg::Msg;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionContextState {
    Init,
    /// Group creations issued, barrier not reached yet
    Starting,
    Running,
    Closing,
    Closed,
}

/// Shutdown progress reported after each closed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseProgress {
    Pending { closed: usize, total: usize },
    Closed,
}

type OnClosed = Box<dyn FnOnce(&ExtensionContext) + Send>;

pub struct ExtensionContext {
    engine: EngineLink,
    topology: OnceCell<Arc<GraphTopology>>,
    extension_threads: Vec<ExtensionThread>,
    extension_threads_cnt_of_ready: usize,
    extension_threads_cnt_of_closed: usize,
    extension_threads_total_cnt: usize,
    state: ExtensionContextState,
    on_closed: Option<OnClosed>,
}

impl ExtensionContext {
    pub fn new(engine: EngineLink) -> Self {
        Self {
            engine,
            topology: OnceCell::new(),
            extension_threads: Vec::new(),
            extension_threads_cnt_of_ready: 0,
            extension_threads_cnt_of_closed: 0,
            extension_threads_total_cnt: 0,
            state: ExtensionContextState::Init,
            on_closed: None,
        }
    }

    pub fn engine(&self) -> &EngineLink {
        &self.engine
    }

    pub fn state(&self) -> ExtensionContextState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ExtensionContextState::Closed
    }

    pub fn extension_threads(&self) -> &[ExtensionThread] {
        &self.extension_threads
    }

    pub fn extension_threads_cnt_of_ready(&self) -> usize {
        self.extension_threads_cnt_of_ready
    }

    pub fn extension_threads_cnt_of_closed(&self) -> usize {
        self.extension_threads_cnt_of_closed
    }

    pub fn extension_threads_total_cnt(&self) -> usize {
        self.extension_threads_total_cnt
    }

    /// The installed topology, once the readiness barrier has been passed.
    pub fn topology(&self) -> Option<&Arc<GraphTopology>> {
        self.topology.get()
    }

    /// Register the callback run when the final close completes.
    pub fn set_on_closed(&mut self, on_closed: impl FnOnce(&ExtensionContext) + Send + 'static) {
        self.on_closed = Some(Box::new(on_closed));
    }

    /// Request creation of every extension group hosted by the local app.
    ///
    /// Creation results come back through the engine mailbox as
    /// [`EngineMsg::ExtensionGroupCreated`]. An unknown group addon stops
    /// issuing requests and is reported to the caller.
    pub fn start_extension_group(&mut self) -> Result<()> {
        let cmd = self.engine.original_start_graph_cmd.clone();
        let app_uri = self.engine.app.uri.clone();
        self.state = ExtensionContextState::Starting;

        if cmd.extension_groups_cnt_of_app(&app_uri) == 0 {
            debug!(graph_id = %self.engine.graph_id, "No local extension groups, starting right away");
            self.install_topology(Arc::new(cmd.topology()))?;
            self.log_graph_resources();
            self.start();
            return Ok(());
        }

        for info in cmd.extension_groups_info() {
            if info.loc.app_uri != app_uri {
                continue;
            }

            let pending = match self
                .engine
                .addons
                .create_extension_group(&info.extension_group_addon_name, info.name())
            {
                Ok(pending) => pending,
                Err(e) => {
                    error!(
                        graph_id = %self.engine.graph_id,
                        extension_group = %info.name(),
                        addon = %info.extension_group_addon_name,
                        error = %e,
                        "Failed to start extension group"
                    );
                    return Err(e);
                }
            };

            let mailbox = self.engine.mailbox.clone();
            tokio::spawn(async move {
                let _ = mailbox.send(EngineMsg::ExtensionGroupCreated(pending.await));
            });
        }

        Ok(())
    }

    /// Completion of one extension group creation.
    pub fn on_extension_group_created(&mut self, mut group: ExtensionGroup) {
        let cmd = self.engine.original_start_graph_cmd.clone();
        let app_uri = self.engine.app.uri.clone();

        group.bind(app_uri.as_str(), self.engine.graph_id.as_str());
        if group.is_graph_driven() {
            group.set_extension_addon_and_instance_name_pairs(
                cmd.extension_addon_and_instance_name_pairs_of_group(
                    &app_uri,
                    &self.engine.graph_id,
                    group.name(),
                ),
            );
        }

        match self.state {
            ExtensionContextState::Closed => {
                debug!(
                    extension_group = %group.name(),
                    "Extension group created after the graph closed, dropping it"
                );
                return;
            }
            ExtensionContextState::Closing => {
                // Closing already snapshotted the thread count; account for
                // the late arrival and shut it down straight away.
                let mut thread = ExtensionThread::new();
                thread.attach_to_context_and_group(self, group);
                thread.close();
                self.extension_threads.push(thread);
                self.extension_threads_total_cnt += 1;
                return;
            }
            _ => {}
        }

        let mut thread = ExtensionThread::new();
        thread.attach_to_context_and_group(self, group);
        debug!(
            graph_id = %self.engine.graph_id,
            thread = %thread.id(),
            extension_group = %thread.extension_group_name(),
            "Extension thread created"
        );
        self.extension_threads.push(thread);
        self.extension_threads_cnt_of_ready += 1;

        if self.extension_threads.len() == cmd.extension_groups_cnt_of_app(&app_uri) {
            if let Err(e) = self.install_topology(Arc::new(cmd.topology())) {
                error!(graph_id = %self.engine.graph_id, error = %e, "Readiness barrier reached twice");
                return;
            }

            let topology = self.topology.get().cloned().unwrap_or_default();
            let mut undeclared = Vec::new();
            for thread in &mut self.extension_threads {
                let name = thread.extension_group_name().to_string();
                match (topology.extension_group_info_by_name(&app_uri, &name), thread.group_mut()) {
                    (Some(info), Some(group)) => group.set_info(info.clone()),
                    _ => undeclared.push(name),
                }
            }
            if !undeclared.is_empty() {
                error!(
                    graph_id = %self.engine.graph_id,
                    extension_groups = ?undeclared,
                    "Extension groups missing from the graph, closing"
                );
                self.close();
                return;
            }

            self.log_graph_resources();
            self.start();
        }
    }

    /// Install the frozen topology. Only the first call succeeds.
    pub fn install_topology(&self, topology: Arc<GraphTopology>) -> Result<()> {
        self.topology
            .set(topology)
            .map_err(|_| Error::TopologyAlreadyInstalled)
    }

    fn start(&mut self) {
        self.state = ExtensionContextState::Running;
        let topology = self.topology.get().cloned().unwrap_or_default();

        for thread in &mut self.extension_threads {
            if let Err(e) = thread.start(topology.clone()) {
                error!(
                    extension_group = %thread.extension_group_name(),
                    error = %e,
                    "Failed to start extension thread"
                );
            }
        }

        info!(
            graph_id = %self.engine.graph_id,
            extension_threads = self.extension_threads.len(),
            "Graph started"
        );
    }

    fn log_graph_resources(&self) {
        let mut resources = serde_json::Map::new();
        resources.insert(
            "app_base_dir".to_string(),
            self.engine.app.base_dir.clone().into(),
        );
        if !self.engine.app.uri.is_empty() {
            resources.insert("app_uri".to_string(), self.engine.app.uri.clone().into());
        }
        if let Some(name) = self.engine.graph_name.as_deref().filter(|n| !n.is_empty()) {
            resources.insert("graph_name".to_string(), name.into());
        }
        resources.insert("graph_id".to_string(), self.engine.graph_id.clone().into());

        info!(
            graph_resources = %serde_json::Value::Object(resources),
            "[graph resources]"
        );
    }

    /// Begin shutting the graph down.
    pub fn close(&mut self) {
        if matches!(
            self.state,
            ExtensionContextState::Closing | ExtensionContextState::Closed
        ) {
            return;
        }
        self.state = ExtensionContextState::Closing;

        if self.extension_threads.is_empty() {
            self.do_close();
            return;
        }

        self.extension_threads_total_cnt = self.extension_threads.len();
        self.extension_threads_cnt_of_closed = 0;

        debug!(
            graph_id = %self.engine.graph_id,
            total = self.extension_threads_total_cnt,
            "Closing extension threads"
        );
        for thread in &mut self.extension_threads {
            thread.close();
        }
    }

    /// An extension thread has stopped and posted its last message.
    pub fn on_extension_thread_closed(&mut self, id: ExtensionThreadId) -> CloseProgress {
        let Some(pos) = self.extension_threads.iter().position(|t| t.id() == id) else {
            warn!(thread = %id, "Closed notification from an unknown extension thread");
            return self.progress();
        };

        let mut thread = self.extension_threads.remove(pos);
        thread.join();
        debug!(
            thread = %id,
            extension_group = %thread.extension_group_name(),
            created_at = %thread.created_at(),
            "Extension thread joined"
        );

        if self.state != ExtensionContextState::Closing {
            warn!(
                graph_id = %self.engine.graph_id,
                extension_group = %thread.extension_group_name(),
                "Extension thread exited on its own"
            );
            return self.progress();
        }

        self.extension_threads_cnt_of_closed += 1;
        self.on_close()
    }

    /// Final close once every thread has reported back.
    pub fn on_close(&mut self) -> CloseProgress {
        if self.state == ExtensionContextState::Closed {
            return CloseProgress::Closed;
        }
        if self.extension_threads_cnt_of_closed != self.extension_threads_total_cnt {
            debug!(
                graph_id = %self.engine.graph_id,
                closed = self.extension_threads_cnt_of_closed,
                total = self.extension_threads_total_cnt,
                "Waiting for extension threads to close"
            );
            return self.progress();
        }

        self.do_close();
        CloseProgress::Closed
    }

    fn progress(&self) -> CloseProgress {
        if self.state == ExtensionContextState::Closed {
            CloseProgress::Closed
        } else {
            CloseProgress::Pending {
                closed: self.extension_threads_cnt_of_closed,
                total: self.extension_threads_total_cnt,
            }
        }
    }

    fn do_close(&mut self) {
        debug_assert!(
            self.extension_threads.is_empty(),
            "every extension thread must be gone before the context closes"
        );

        self.engine.env.close();
        self.state = ExtensionContextState::Closed;
        info!(graph_id = %self.engine.graph_id, "Extension context closed");

        if let Some(on_closed) = self.on_closed.take() {
            on_closed(self);
        }
    }

    /// Route a message to the threads hosting its local destinations.
    pub(crate) fn dispatch(&self, msg: Msg) {
        let app_uri = self.engine.app.uri.as_str();

        for dest in msg.dest() {
            let Some(extension) = dest.extension_name() else {
                warn!(msg = %msg.name(), dest = %dest, "Destination without an extension");
                continue;
            };
            if dest.app_uri != app_uri {
                warn!(msg = %msg.name(), dest = %dest, "Remote destinations are not reachable, dropping");
                continue;
            }

            let group = self.extension_group_name(
                Some(&dest.app_uri),
                Some(&dest.graph_id),
                Some(extension),
            );
            let thread = group.and_then(|group| {
                self.extension_threads
                    .iter()
                    .find(|t| t.extension_group_name() == group)
            });

            match thread {
                Some(thread) => {
                    if !thread.deliver(extension.to_string(), msg.clone()) {
                        debug!(msg = %msg.name(), dest = %dest, "Destination thread is not running");
                    }
                }
                None => warn!(msg = %msg.name(), dest = %dest, "Unknown destination, dropping"),
            }
        }
    }

    pub fn extension_info_by_name(
        &self,
        app_uri: Option<&str>,
        graph_id: Option<&str>,
        extension_name: Option<&str>,
    ) -> Option<&Arc<ExtensionInfo>> {
        self.topology
            .get()?
            .extension_info_by_name(app_uri, graph_id, extension_name)
    }

    pub fn extension_group_name(
        &self,
        app_uri: Option<&str>,
        graph_id: Option<&str>,
        extension_name: Option<&str>,
    ) -> Option<&str> {
        self.topology
            .get()?
            .extension_group_name(app_uri, graph_id, extension_name)
    }

    pub fn extension_group_info_by_name(
        &self,
        app_uri: &str,
        extension_group_name: &str,
    ) -> Option<&Arc<ExtensionGroupInfo>> {
        self.topology
            .get()?
            .extension_group_info_by_name(app_uri, extension_group_name)
    }
}

impl std::fmt::Debug for ExtensionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionContext")
            .field("graph_id", &self.engine.graph_id)
            .field("state", &self.state)
            .field("extension_threads", &self.extension_threads.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::addon::AddonRegistry;
    use crate::app::AppInfo;
    use crate::engine::EngineEnv;
    use crate::extension::Extension;
    use crate::graph::{GraphDefinition, DEFAULT_EXTENSION_GROUP};
    use crate::msg::StartGraphCmd;

    const APP: &str = "msgpack://127.0.0.1:8001/";

    struct Idle;

    #[async_trait]
    impl Extension for Idle {}

    fn context_for(graph: &str) -> (ExtensionContext, mpsc::UnboundedReceiver<EngineMsg>) {
        let addons = AddonRegistry::new();
        addons
            .register_extension_addon("idle", |_: &str| -> Result<Box<dyn Extension>> {
                Ok(Box::new(Idle))
            })
            .unwrap();
        context_with(graph, addons)
    }

    fn context_with(
        graph: &str,
        addons: AddonRegistry,
    ) -> (ExtensionContext, mpsc::UnboundedReceiver<EngineMsg>) {
        let graph = GraphDefinition::from_json(graph).unwrap();
        let cmd = StartGraphCmd::from_definition(&graph, APP, "g1")
            .unwrap()
            .with_graph_name("test_graph");

        let (tx, rx) = mpsc::unbounded_channel();
        let link = EngineLink {
            graph_id: "g1".to_string(),
            graph_name: cmd.graph_name().map(String::from),
            app: Arc::new(AppInfo::new(APP, "/tmp/app")),
            original_start_graph_cmd: Arc::new(cmd),
            addons: Arc::new(addons),
            mailbox: tx,
            env: EngineEnv::default(),
        };
        (ExtensionContext::new(link), rx)
    }

    fn three_groups() -> (ExtensionContext, mpsc::UnboundedReceiver<EngineMsg>) {
        context_for(
            r#"{"nodes": [
                {"type": "extension", "name": "a", "addon": "idle", "extension_group": "g1"},
                {"type": "extension", "name": "b", "addon": "idle", "extension_group": "g2"},
                {"type": "extension", "name": "c", "addon": "idle", "extension_group": "g3"}
            ]}"#,
        )
    }

    fn group(name: &str) -> ExtensionGroup {
        ExtensionGroup::new(name, DEFAULT_EXTENSION_GROUP)
    }

    /// Close the context and feed closed notifications back until done.
    async fn shutdown(ctx: &mut ExtensionContext, rx: &mut mpsc::UnboundedReceiver<EngineMsg>) {
        ctx.close();
        while !ctx.is_closed() {
            match rx.recv().await {
                Some(EngineMsg::ExtensionThreadClosed(id)) => {
                    ctx.on_extension_thread_closed(id);
                }
                Some(_) => {}
                None => panic!("engine mailbox closed"),
            }
        }
    }

    // ========================================================================
    // Readiness barrier
    // ========================================================================

    #[tokio::test]
    async fn test_barrier_under_every_completion_order() {
        let orders = [
            ["g1", "g2", "g3"],
            ["g1", "g3", "g2"],
            ["g2", "g1", "g3"],
            ["g2", "g3", "g1"],
            ["g3", "g1", "g2"],
            ["g3", "g2", "g1"],
        ];

        for order in orders {
            let (mut ctx, mut rx) = three_groups();
            ctx.state = ExtensionContextState::Starting;

            ctx.on_extension_group_created(group(order[0]));
            ctx.on_extension_group_created(group(order[1]));
            assert!(ctx.topology().is_none(), "installed early for {:?}", order);
            assert_eq!(ctx.state(), ExtensionContextState::Starting);
            assert_eq!(ctx.extension_threads_cnt_of_ready(), 2);

            ctx.on_extension_group_created(group(order[2]));
            let topology = ctx.topology().unwrap();
            assert_eq!(topology.extensions().len(), 3);
            assert_eq!(topology.extension_groups().len(), 3);
            assert_eq!(ctx.state(), ExtensionContextState::Running);
            assert_eq!(ctx.extension_threads_cnt_of_ready(), 3);
            assert_eq!(ctx.extension_threads().len(), 3);

            shutdown(&mut ctx, &mut rx).await;
        }
    }

    #[tokio::test]
    async fn test_group_members_resolved_from_graph() {
        let (mut ctx, mut rx) = context_for(
            r#"{"nodes": [
                {"type": "extension", "name": "a", "addon": "idle", "extension_group": "front"},
                {"type": "extension", "name": "b", "addon": "idle", "extension_group": "front"},
                {"type": "extension", "name": "c", "addon": "idle"}
            ]}"#,
        );
        ctx.state = ExtensionContextState::Starting;

        ctx.on_extension_group_created(group("front"));
        let front = ctx.extension_threads()[0].group().unwrap();
        let names: Vec<_> = front
            .extension_addon_and_instance_name_pairs()
            .iter()
            .map(|p| p.instance_name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(front.graph_id(), Some("g1"));

        ctx.on_extension_group_created(group("c"));
        assert_eq!(ctx.state(), ExtensionContextState::Running);
        assert_eq!(ctx.extension_group_name(Some(APP), Some("g1"), Some("b")), Some("front"));
        assert!(ctx.extension_group_info_by_name(APP, "c").is_some());

        shutdown(&mut ctx, &mut rx).await;
    }

    #[tokio::test]
    async fn test_undeclared_group_closes_at_barrier() {
        let (mut ctx, mut rx) = three_groups();
        ctx.state = ExtensionContextState::Starting;

        ctx.on_extension_group_created(group("g1"));
        ctx.on_extension_group_created(group("g2"));
        ctx.on_extension_group_created(group("elsewhere"));

        assert_eq!(ctx.state(), ExtensionContextState::Closing);
        assert_eq!(ctx.extension_threads_total_cnt(), 3);
        while !ctx.is_closed() {
            if let Some(EngineMsg::ExtensionThreadClosed(id)) = rx.recv().await {
                ctx.on_extension_thread_closed(id);
            }
        }
        assert_eq!(ctx.extension_threads_cnt_of_closed(), 3);
    }

    // ========================================================================
    // Fast paths and guards
    // ========================================================================

    #[tokio::test]
    async fn test_empty_graph_starts_immediately() {
        // Any addon lookup would fail against an empty registry.
        let (mut ctx, _rx) = context_with(r#"{"nodes": []}"#, AddonRegistry::empty());

        ctx.start_extension_group().unwrap();
        assert_eq!(ctx.state(), ExtensionContextState::Running);
        assert!(ctx.topology().is_some());
        assert!(ctx.extension_threads().is_empty());

        ctx.close();
        assert!(ctx.is_closed());
    }

    #[tokio::test]
    async fn test_topology_installed_once() {
        let (ctx, _rx) = context_for(r#"{"nodes": []}"#);

        ctx.install_topology(Arc::new(GraphTopology::default())).unwrap();
        let err = ctx
            .install_topology(Arc::new(GraphTopology::default()))
            .unwrap_err();
        assert!(matches!(err, Error::TopologyAlreadyInstalled));
    }

    #[tokio::test]
    async fn test_unknown_group_addon_fails_fast() {
        let (mut ctx, mut rx) = context_for(
            r#"{"nodes": [
                {"type": "extension", "name": "a", "addon": "idle", "extension_group": "g1"},
                {"type": "extension", "name": "b", "addon": "idle", "extension_group": "g2"},
                {"type": "extension_group", "name": "g1", "addon": "default_extension_group"},
                {"type": "extension_group", "name": "g2", "addon": "nonexistent_addon"}
            ]}"#,
        );

        let err = ctx.start_extension_group().unwrap_err();
        assert_eq!(err.to_string(), "Unable to find nonexistent_addon");

        // Only the request issued before the failure completes.
        match rx.recv().await {
            Some(EngineMsg::ExtensionGroupCreated(Ok(group))) => assert_eq!(group.name(), "g1"),
            other => panic!("unexpected engine message: {:?}", other),
        }

        ctx.close();
        assert!(ctx.is_closed());
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    #[tokio::test]
    async fn test_close_counts_notifications() {
        let (mut ctx, mut rx) = three_groups();
        ctx.state = ExtensionContextState::Starting;
        for name in ["g1", "g2", "g3"] {
            ctx.on_extension_group_created(group(name));
        }

        let closed_calls = Arc::new(AtomicUsize::new(0));
        let calls = closed_calls.clone();
        ctx.set_on_closed(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });

        ctx.close();
        assert_eq!(ctx.state(), ExtensionContextState::Closing);
        assert_eq!(ctx.extension_threads_total_cnt(), 3);

        let mut progress = Vec::new();
        while progress.len() < 3 {
            if let Some(EngineMsg::ExtensionThreadClosed(id)) = rx.recv().await {
                progress.push(ctx.on_extension_thread_closed(id));
            }
        }

        assert_eq!(progress[0], CloseProgress::Pending { closed: 1, total: 3 });
        assert_eq!(progress[1], CloseProgress::Pending { closed: 2, total: 3 });
        assert_eq!(progress[2], CloseProgress::Closed);
        assert_eq!(closed_calls.load(Ordering::SeqCst), 1);
        assert!(ctx.extension_threads().is_empty());
        assert!(ctx.engine().env.is_closed());

        // A repeated on_close does not close twice.
        assert_eq!(ctx.on_close(), CloseProgress::Closed);
        assert_eq!(closed_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_without_threads_is_synchronous() {
        let (mut ctx, _rx) = three_groups();
        let closed = Arc::new(AtomicUsize::new(0));
        let c = closed.clone();
        ctx.set_on_closed(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        ctx.close();
        assert!(ctx.is_closed());
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        // Late group arrivals after the final close are dropped.
        ctx.on_extension_group_created(group("g1"));
        assert!(ctx.extension_threads().is_empty());
    }

    #[tokio::test]
    async fn test_group_arriving_while_closing_is_closed() {
        let (mut ctx, mut rx) = three_groups();
        ctx.state = ExtensionContextState::Starting;
        ctx.on_extension_group_created(group("g1"));

        ctx.close();
        assert_eq!(ctx.extension_threads_total_cnt(), 1);

        ctx.on_extension_group_created(group("g2"));
        assert_eq!(ctx.extension_threads_total_cnt(), 2);
        assert!(ctx.topology().is_none());

        while !ctx.is_closed() {
            if let Some(EngineMsg::ExtensionThreadClosed(id)) = rx.recv().await {
                ctx.on_extension_thread_closed(id);
            }
        }
        assert_eq!(ctx.extension_threads_cnt_of_closed(), 2);
    }
}
