//! Builtin demo addons registered by the CLI.

use std::time::Duration;

use ten_runtime::prelude::*;
use ten_runtime::AddonRegistry;
use tokio::task::JoinHandle;

pub const LOG_ADDON: &str = "log";
pub const HEARTBEAT_ADDON: &str = "heartbeat";

const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 1000;

/// Registry with the default extension group and every builtin addon.
pub fn registry() -> Result<AddonRegistry> {
    let registry = AddonRegistry::new();
    registry.register_extension_addon(LOG_ADDON, |_: &str| -> Result<Box<dyn Extension>> {
        Ok(Box::new(LogExtension::default()))
    })?;
    registry.register_extension_addon(HEARTBEAT_ADDON, |_: &str| -> Result<Box<dyn Extension>> {
        Ok(Box::new(HeartbeatExtension::default()))
    })?;
    Ok(registry)
}

/// Logs every message it receives.
#[derive(Default)]
pub struct LogExtension {
    received: u64,
}

#[async_trait]
impl Extension for LogExtension {
    async fn on_cmd(&mut self, env: &mut TenEnv, cmd: Msg) -> Result<()> {
        self.received += 1;
        tracing::info!(
            extension = %env.extension_name(),
            from = %cmd.src(),
            cmd = %cmd.name(),
            properties = %serde_json::Value::Object(cmd.properties().clone()),
            "Received cmd"
        );
        Ok(())
    }

    async fn on_data(&mut self, env: &mut TenEnv, data: Msg) -> Result<()> {
        self.received += 1;
        tracing::info!(
            extension = %env.extension_name(),
            from = %data.src(),
            data = %data.name(),
            properties = %serde_json::Value::Object(data.properties().clone()),
            "Received data"
        );
        Ok(())
    }

    async fn on_stop(&mut self, env: &mut TenEnv) -> Result<()> {
        tracing::info!(extension = %env.extension_name(), received = self.received, "Log extension stopped");
        Ok(())
    }
}

/// Emits a `heartbeat` data message on a fixed interval.
///
/// The interval comes from the `interval_ms` property.
#[derive(Default)]
pub struct HeartbeatExtension {
    ticker: Option<JoinHandle<()>>,
}

#[async_trait]
impl Extension for HeartbeatExtension {
    async fn on_start(&mut self, env: &mut TenEnv) -> Result<()> {
        let interval_ms = env
            .property_u64("interval_ms")
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS);
        let env = env.clone();

        self.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            let mut seq: u64 = 0;
            loop {
                interval.tick().await;
                seq += 1;
                let beat = Msg::data("heartbeat").with_property("seq", seq);
                if let Err(e) = env.send_data(beat) {
                    tracing::warn!(extension = %env.extension_name(), error = %e, "Heartbeat stopped");
                    break;
                }
            }
        }));
        Ok(())
    }

    async fn on_stop(&mut self, _env: &mut TenEnv) -> Result<()> {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        Ok(())
    }
}
