//! Addon registry.
//!
//! Addons are factories: extension addons build extensions, extension-group
//! addons build extension groups. Group creation is asynchronous and is
//! handed back to the caller as a [`PendingGroup`] future.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::extension::Extension;
use crate::extension_group::ExtensionGroup;
use crate::graph::DEFAULT_EXTENSION_GROUP;

/// Factory for extensions.
pub trait ExtensionAddon: Send + Sync {
    fn create_instance(&self, instance_name: &str) -> Result<Box<dyn Extension>>;
}

impl<F> ExtensionAddon for F
where
    F: Fn(&str) -> Result<Box<dyn Extension>> + Send + Sync,
{
    fn create_instance(&self, instance_name: &str) -> Result<Box<dyn Extension>> {
        self(instance_name)
    }
}

/// Factory for extension groups.
#[async_trait]
pub trait ExtensionGroupAddon: Send + Sync {
    async fn create_instance(&self, instance_name: &str) -> Result<ExtensionGroup>;
}

/// Builds the generic group whose members come from the graph.
#[derive(Debug, Default)]
pub struct DefaultExtensionGroupAddon;

#[async_trait]
impl ExtensionGroupAddon for DefaultExtensionGroupAddon {
    async fn create_instance(&self, instance_name: &str) -> Result<ExtensionGroup> {
        Ok(ExtensionGroup::new(instance_name, DEFAULT_EXTENSION_GROUP))
    }
}

/// An extension group whose creation is in flight.
pub struct PendingGroup {
    inner: BoxFuture<'static, Result<ExtensionGroup>>,
}

impl Future for PendingGroup {
    type Output = Result<ExtensionGroup>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for PendingGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingGroup").finish_non_exhaustive()
    }
}

/// Registry of extension and extension-group addons, keyed by addon name.
pub struct AddonRegistry {
    extension_addons: RwLock<HashMap<String, Arc<dyn ExtensionAddon>>>,
    group_addons: RwLock<HashMap<String, Arc<dyn ExtensionGroupAddon>>>,
}

impl AddonRegistry {
    /// A registry with the builtin default extension group addon.
    pub fn new() -> Self {
        let registry = Self::empty();
        registry
            .group_addons
            .write()
            .insert(DEFAULT_EXTENSION_GROUP.to_string(), Arc::new(DefaultExtensionGroupAddon));
        registry
    }

    /// A registry with nothing registered.
    pub fn empty() -> Self {
        Self {
            extension_addons: RwLock::new(HashMap::new()),
            group_addons: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_extension_addon(
        &self,
        name: impl Into<String>,
        addon: impl ExtensionAddon + 'static,
    ) -> Result<()> {
        let name = name.into();
        let mut addons = self.extension_addons.write();
        if addons.contains_key(&name) {
            return Err(Error::AddonAlreadyRegistered(name));
        }
        tracing::debug!(addon = %name, "Registered extension addon");
        addons.insert(name, Arc::new(addon));
        Ok(())
    }

    pub fn register_extension_group_addon(
        &self,
        name: impl Into<String>,
        addon: impl ExtensionGroupAddon + 'static,
    ) -> Result<()> {
        let name = name.into();
        let mut addons = self.group_addons.write();
        if addons.contains_key(&name) {
            return Err(Error::AddonAlreadyRegistered(name));
        }
        tracing::debug!(addon = %name, "Registered extension group addon");
        addons.insert(name, Arc::new(addon));
        Ok(())
    }

    pub fn has_extension_addon(&self, name: &str) -> bool {
        self.extension_addons.read().contains_key(name)
    }

    pub fn has_extension_group_addon(&self, name: &str) -> bool {
        self.group_addons.read().contains_key(name)
    }

    /// Start creating a group instance.
    ///
    /// Fails right away when the addon is unknown; otherwise the returned
    /// future resolves once the addon has built the group. A group whose
    /// name differs from `instance_name` is an error.
    pub fn create_extension_group(
        &self,
        addon_name: &str,
        instance_name: &str,
    ) -> Result<PendingGroup> {
        let addon = self
            .group_addons
            .read()
            .get(addon_name)
            .cloned()
            .ok_or_else(|| Error::AddonNotFound {
                addon: addon_name.to_string(),
            })?;

        let addon_name = addon_name.to_string();
        let instance_name = instance_name.to_string();
        let inner = async move {
            let group = addon.create_instance(&instance_name).await?;
            if group.name() != instance_name {
                return Err(Error::GroupCreationFailed(format!(
                    "addon '{}' was asked for '{}' but built '{}'",
                    addon_name,
                    instance_name,
                    group.name()
                )));
            }
            Ok(group)
        }
        .boxed();
        Ok(PendingGroup { inner })
    }

    pub fn create_extension(
        &self,
        addon_name: &str,
        instance_name: &str,
    ) -> Result<Box<dyn Extension>> {
        let addon = self
            .extension_addons
            .read()
            .get(addon_name)
            .cloned()
            .ok_or_else(|| Error::AddonNotFound {
                addon: addon_name.to_string(),
            })?;
        addon.create_instance(instance_name)
    }
}

impl Default for AddonRegistry {
    fn default() -> Self {
        Self::new()
    }
}
