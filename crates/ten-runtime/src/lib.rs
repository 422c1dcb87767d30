//! Extension graph runtime.
//!
//! A graph is a set of extensions, grouped into extension groups and wired
//! together by declared connections. Each running graph is driven by an
//! [`Engine`] whose [`ExtensionContext`] creates the groups through the
//! [`AddonRegistry`], gives every group its own OS thread, and tears the
//! whole graph down again when asked to.

pub mod addon;
pub mod app;
pub mod config;
pub mod engine;
pub mod error;
pub mod extension;
pub mod extension_context;
pub mod extension_group;
pub mod extension_thread;
pub mod graph;
pub mod loc;
pub mod logging;
pub mod msg;

pub use addon::{AddonRegistry, DefaultExtensionGroupAddon, ExtensionAddon, ExtensionGroupAddon, PendingGroup};
pub use app::{App, AppInfo};
pub use config::RuntimeConfig;
pub use engine::{Engine, EngineEnv, EngineHandle, EngineLink};
pub use error::{Error, ErrorCode, Result};
pub use extension::{Extension, TenEnv};
pub use extension_context::{CloseProgress, ExtensionContext, ExtensionContextState};
pub use extension_group::ExtensionGroup;
pub use extension_thread::{ExtensionThread, ExtensionThreadId, ExtensionThreadState};
pub use graph::{GraphDefinition, GraphTopology};
pub use loc::Loc;
pub use msg::{Msg, MsgType, StartGraphCmd};

/// Everything an extension author usually needs.
pub mod prelude {
    pub use crate::addon::{ExtensionAddon, ExtensionGroupAddon};
    pub use crate::error::{Error, Result};
    pub use crate::extension::{Extension, TenEnv};
    pub use crate::extension_group::ExtensionGroup;
    pub use crate::msg::{Msg, MsgType};
    pub use async_trait::async_trait;
}
