//! Message routing tests.
//!
//! Messages travel between extensions on different extension threads,
//! either along the graph's connections or to explicit destinations.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use ten_runtime::config::RuntimeConfig;
use ten_runtime::prelude::*;
use ten_runtime::{AddonRegistry, App, GraphDefinition};

type Inbox = Arc<Mutex<Vec<(String, String)>>>;

/// Sends `ping` when started and records everything it receives.
struct Pinger {
    inbox: Inbox,
}

#[async_trait]
impl Extension for Pinger {
    async fn on_start(&mut self, env: &mut TenEnv) -> Result<()> {
        env.send_cmd(Msg::cmd("ping").with_property("seq", 1))
    }

    async fn on_data(&mut self, env: &mut TenEnv, data: Msg) -> Result<()> {
        self.inbox
            .lock()
            .push((env.extension_name().to_string(), data.name().to_string()));
        Ok(())
    }
}

/// Answers `ping` with `pong` data and records what it receives.
struct Ponger {
    inbox: Inbox,
}

#[async_trait]
impl Extension for Ponger {
    async fn on_cmd(&mut self, env: &mut TenEnv, cmd: Msg) -> Result<()> {
        self.inbox
            .lock()
            .push((env.extension_name().to_string(), cmd.name().to_string()));
        if cmd.name() == "ping" {
            assert_eq!(cmd.src().extension_name(), Some("pinger"));
            env.send_data(Msg::data("pong"))?;
        }
        Ok(())
    }
}

/// Closes the whole graph as soon as it starts.
struct Closer;

#[async_trait]
impl Extension for Closer {
    async fn on_start(&mut self, env: &mut TenEnv) -> Result<()> {
        env.close_graph()
    }
}

fn create_test_app() -> (App, Inbox) {
    let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));
    let addons = AddonRegistry::new();

    let i = inbox.clone();
    addons
        .register_extension_addon("pinger", move |_: &str| -> Result<Box<dyn Extension>> {
            Ok(Box::new(Pinger { inbox: i.clone() }))
        })
        .unwrap();
    let i = inbox.clone();
    addons
        .register_extension_addon("ponger", move |_: &str| -> Result<Box<dyn Extension>> {
            Ok(Box::new(Ponger { inbox: i.clone() }))
        })
        .unwrap();
    addons
        .register_extension_addon("closer", |_: &str| -> Result<Box<dyn Extension>> {
            Ok(Box::new(Closer))
        })
        .unwrap();

    let mut config = RuntimeConfig::default();
    config.app.uri = "msgpack://127.0.0.1:8001/".to_string();
    (App::new(&config, addons), inbox)
}

async fn wait_for_messages(inbox: &Inbox, expected: usize) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while inbox.lock().len() < expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "inbox stuck at {:?}", inbox.lock());
}

const PING_PONG: &str = r#"{
    "nodes": [
        {"type": "extension", "name": "pinger", "addon": "pinger"},
        {"type": "extension", "name": "ponger", "addon": "ponger"}
    ],
    "connections": [
        {"extension": "pinger", "cmd": [{"name": "ping", "dest": [{"extension": "ponger"}]}]},
        {"extension": "ponger", "data": [{"name": "pong", "dest": [{"extension": "pinger"}]}]}
    ]
}"#;

#[tokio::test]
async fn test_ping_pong_across_threads() {
    let (app, inbox) = create_test_app();
    let graph = GraphDefinition::from_json(PING_PONG).unwrap();

    let graph_id = app.start_graph(&graph).await.unwrap();
    wait_for_messages(&inbox, 2).await;
    app.close_graph(&graph_id).await.unwrap();

    let received = inbox.lock().clone();
    assert!(received.contains(&("ponger".to_string(), "ping".to_string())));
    assert!(received.contains(&("pinger".to_string(), "pong".to_string())));
}

#[tokio::test]
async fn test_app_injects_with_explicit_destination() {
    let (app, inbox) = create_test_app();
    let graph = GraphDefinition::from_json(PING_PONG).unwrap();

    let graph_id = app.start_graph(&graph).await.unwrap();
    wait_for_messages(&inbox, 2).await;

    app.send(&graph_id, Msg::cmd("status").with_dest("ponger"))
        .await
        .unwrap();
    wait_for_messages(&inbox, 3).await;
    assert!(inbox
        .lock()
        .contains(&("ponger".to_string(), "status".to_string())));

    app.close_graph(&graph_id).await.unwrap();
}

#[tokio::test]
async fn test_app_send_requires_destination() {
    let (app, _inbox) = create_test_app();
    let graph = GraphDefinition::from_json(PING_PONG).unwrap();
    let graph_id = app.start_graph(&graph).await.unwrap();

    let err = app.send(&graph_id, Msg::cmd("status")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let err = app
        .send("no-such-graph", Msg::cmd("status").with_dest("ponger"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::GraphNotFound(_)));

    // Unknown destinations are dropped, the graph keeps running.
    app.send(&graph_id, Msg::data("frame").with_dest("ghost"))
        .await
        .unwrap();
    assert_eq!(app.running_graphs().await, vec![graph_id.clone()]);

    app.close_graph(&graph_id).await.unwrap();
}

#[tokio::test]
async fn test_extension_closes_graph() {
    let (app, _inbox) = create_test_app();
    let graph = GraphDefinition::from_json(
        r#"{"nodes": [
            {"type": "extension", "name": "closer", "addon": "closer"},
            {"type": "extension", "name": "ponger", "addon": "ponger"}
        ]}"#,
    )
    .unwrap();

    let graph_id = app.start_graph(&graph).await.unwrap();
    let handle = app.graph(&graph_id).await.unwrap();

    handle
        .wait_closed_timeout(Duration::from_secs(5))
        .await
        .unwrap();
    assert!(handle.is_closed());
    assert!(app.running_graphs().await.is_empty());
    assert!(app.graph(&graph_id).await.is_none());
}
