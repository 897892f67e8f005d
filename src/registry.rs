use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::directory::{Directory, Subscriptions};
use crate::thing::{
    ActionDef, SafeThing, ThingAttr, ThingEvent, ThingInfo, ThingStatus, Topic,
};
use crate::{Result, SafeThingError};

/// Opaque reference to a thing owned by a [`Registry`].
///
/// Handles are never reused by the registry that issued them, so a handle
/// kept after [`Registry::destroy`] is reported as invalid instead of
/// reaching another thing.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Handle(NonZeroU64);

impl Handle {
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Handle)
    }

    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle table owning every thing created through it.
///
/// The table lock is only held to find or change the binding of a handle.
/// Operations run under the lock of their own thing, so slow directory
/// writes on one handle do not stall the others.
pub struct Registry {
    next: AtomicU64,
    things: RwLock<HashMap<Handle, Arc<Mutex<SafeThing>>>>,
    directory: Arc<dyn Directory>,
}

impl Registry {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Registry {
            next: AtomicU64::new(1),
            things: RwLock::new(HashMap::new()),
            directory,
        }
    }

    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    pub fn len(&self) -> usize {
        self.things
            .read()
            .map(|things| things.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn create(&self, thing_id: &str) -> Result<Handle> {
        let thing = SafeThing::new(thing_id, self.directory.clone())?;
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        let handle = Handle::from_raw(raw).ok_or_else(|| {
            SafeThingError::Other(anyhow::anyhow!("handle space exhausted"))
        })?;

        self.things
            .write()?
            .insert(handle, Arc::new(Mutex::new(thing)));
        log::trace!("handle {} bound to {}", handle, thing_id);
        Ok(handle)
    }

    fn with_thing<R>(
        &self,
        handle: Handle,
        operation: impl FnOnce(&mut SafeThing) -> Result<R>,
    ) -> Result<R> {
        let thing = self
            .things
            .read()?
            .get(&handle)
            .cloned()
            .ok_or(SafeThingError::InvalidHandle(handle.raw()))?;
        let mut thing = thing.lock()?;
        operation(&mut thing)
    }

    /// Replace the attributes of the thing behind `handle`.
    pub fn register_attributes(
        &self,
        handle: Handle,
        attrs: Vec<ThingAttr>,
    ) -> Result<()> {
        self.with_thing(handle, |thing| thing.register_attributes(attrs))
    }

    pub fn register_thing(
        &self,
        handle: Handle,
        attrs: Vec<ThingAttr>,
        topics: Vec<Topic>,
        actions: Vec<ActionDef>,
    ) -> Result<()> {
        self.with_thing(handle, |thing| {
            thing.register_thing(attrs, topics, actions)
        })
    }

    /// Replace the topics of the thing behind `handle`.
    pub fn register_topics(
        &self,
        handle: Handle,
        topics: Vec<Topic>,
    ) -> Result<()> {
        self.with_thing(handle, |thing| thing.register_topics(topics))
    }

    pub fn publish(&self, handle: Handle, thing_id: &str) -> Result<ThingInfo> {
        self.with_thing(handle, |thing| thing.publish_thing(thing_id))
    }

    pub fn notify(&self, handle: Handle, topic: &str, data: &str) -> Result<()> {
        self.with_thing(handle, |thing| thing.notify(topic, data))
    }

    pub fn subscribe(
        &self,
        handle: Handle,
        thing_id: &str,
        topic: &str,
    ) -> Result<()> {
        self.with_thing(handle, |thing| thing.subscribe(thing_id, topic))
    }

    pub fn subscriptions(&self, handle: Handle) -> Result<Subscriptions> {
        self.with_thing(handle, |thing| thing.subscriptions())
    }

    pub fn subscribed_events(&self, handle: Handle) -> Result<Vec<ThingEvent>> {
        self.with_thing(handle, |thing| thing.subscribed_events())
    }

    pub fn status(&self, handle: Handle) -> Result<ThingStatus> {
        self.with_thing(handle, |thing| Ok(thing.status()))
    }

    /// Release the thing behind `handle`. The handle is dead afterwards.
    pub fn destroy(&self, handle: Handle) -> Result<()> {
        let thing = self
            .things
            .write()?
            .remove(&handle)
            .ok_or(SafeThingError::InvalidHandle(handle.raw()))?;
        match thing.lock() {
            Ok(thing) => {
                log::trace!("handle {} of {} destroyed", handle, thing.thing_id())
            }
            Err(_) => log::warn!("handle {} destroyed after a panic", handle),
        }
        drop(thing);
        Ok(())
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let things = match self.things.get_mut() {
            Ok(things) => things,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !things.is_empty() {
            log::warn!(
                "{} things were never destroyed, releasing them",
                things.len()
            );
            things.clear();
        }
    }
}
