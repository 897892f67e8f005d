use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::directory::{Directory, Subscriptions};
use crate::id::ThingAddr;
use crate::{Result, SafeThingError};

/// Which set of things may use a topic or an action.
///
/// `Thing` is the thing itself, `Owner` adds whoever owns it, `Group` adds
/// a group of individuals or things, `All` opens it to anyone.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessType {
    Thing,
    Owner,
    Group,
    All,
}

/// Lifecycle status of a thing.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThingStatus {
    /// Only the identifier is known.
    Unregistered = 0,
    /// Attributes were registered but the thing was not published since.
    Registered = 1,
    /// The current attributes are discoverable through the directory.
    Published = 2,
}

impl fmt::Display for ThingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ThingStatus::Unregistered => "Unregistered",
            ThingStatus::Registered => "Registered",
            ThingStatus::Published => "Published",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThingAttr {
    pub attr: String,
    pub value: String,
}

impl ThingAttr {
    pub fn new(attr: &str, value: &str) -> Self {
        ThingAttr {
            attr: attr.to_owned(),
            value: value.to_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
    pub access: AccessType,
}

impl Topic {
    pub fn new(name: &str, access: AccessType) -> Self {
        Topic {
            name: name.to_owned(),
            access,
        }
    }
}

/// An action other things can request. Argument values are opaque.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDef {
    pub name: String,
    pub access: AccessType,
    pub args: Vec<String>,
}

impl ActionDef {
    pub fn new(name: &str, access: AccessType, args: &[&str]) -> Self {
        ActionDef {
            name: name.to_owned(),
            access,
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }
}

/// An event recorded on a topic some thing published.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThingEvent {
    pub thing_id: String,
    pub topic: String,
    pub data: String,
}

/// Snapshot of a thing as found in the publication directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThingInfo {
    pub id: String,
    pub addr_name: String,
    pub status: ThingStatus,
    pub attrs: Vec<ThingAttr>,
    pub topics: Vec<Topic>,
    pub actions: Vec<ActionDef>,
}

/// The resource backing one logical thing.
///
/// A `SafeThing` is owned by exactly one caller and cannot be cloned.
/// Dropping it releases it; things it already published stay in the
/// directory.
pub struct SafeThing {
    thing_id: String,
    addr: ThingAddr,
    status: ThingStatus,
    attrs: Vec<ThingAttr>,
    topics: Vec<Topic>,
    actions: Vec<ActionDef>,
    directory: Arc<dyn Directory>,
}

impl SafeThing {
    pub fn new(
        thing_id: &str,
        directory: Arc<dyn Directory>,
    ) -> Result<Self> {
        if thing_id.is_empty() {
            return Err(SafeThingError::InvalidParameters(
                "thing id must not be empty".to_owned(),
            ));
        }

        let addr = ThingAddr::compute(thing_id);
        log::info!("thing {} created with address {}", thing_id, addr);
        Ok(SafeThing {
            thing_id: thing_id.to_owned(),
            addr,
            status: ThingStatus::Unregistered,
            attrs: vec![],
            topics: vec![],
            actions: vec![],
            directory,
        })
    }

    pub fn thing_id(&self) -> &str {
        &self.thing_id
    }

    pub fn addr(&self) -> ThingAddr {
        self.addr
    }

    pub fn status(&self) -> ThingStatus {
        self.status
    }

    pub fn attrs(&self) -> &[ThingAttr] {
        &self.attrs
    }

    /// Register, or re-register, the thing with its attributes, topics and
    /// actions. Each call replaces everything registered before.
    pub fn register_thing(
        &mut self,
        attrs: Vec<ThingAttr>,
        topics: Vec<Topic>,
        actions: Vec<ActionDef>,
    ) -> Result<()> {
        self.attrs = attrs;
        self.topics = topics;
        self.actions = actions;
        self.status = ThingStatus::Registered;
        log::debug!(
            "thing {} registered with {} attributes, {} topics, {} actions",
            self.thing_id,
            self.attrs.len(),
            self.topics.len(),
            self.actions.len()
        );
        Ok(())
    }

    /// Replace only the attributes, keeping topics and actions.
    pub fn register_attributes(&mut self, attrs: Vec<ThingAttr>) -> Result<()> {
        let topics = std::mem::take(&mut self.topics);
        let actions = std::mem::take(&mut self.actions);
        self.register_thing(attrs, topics, actions)
    }

    /// Replace only the topics, keeping attributes and actions.
    pub fn register_topics(&mut self, topics: Vec<Topic>) -> Result<()> {
        let attrs = std::mem::take(&mut self.attrs);
        let actions = std::mem::take(&mut self.actions);
        self.register_thing(attrs, topics, actions)
    }

    /// Make the registered attributes, topics and actions discoverable.
    ///
    /// `thing_id` must be the identifier the thing was created with.
    pub fn publish_thing(&mut self, thing_id: &str) -> Result<ThingInfo> {
        if thing_id != self.thing_id {
            return Err(SafeThingError::InvalidParameters(format!(
                "cannot publish {:?} through the handle of {:?}",
                thing_id, self.thing_id
            )));
        }
        if self.status == ThingStatus::Unregistered {
            return Err(SafeThingError::InvalidStatus(format!(
                "thing {} must be registered before publishing",
                self.thing_id
            )));
        }

        let info = ThingInfo {
            id: self.thing_id.clone(),
            addr_name: self.addr.to_string(),
            status: ThingStatus::Published,
            attrs: self.attrs.clone(),
            topics: self.topics.clone(),
            actions: self.actions.clone(),
        };
        self.directory.publish(&info)?;
        self.status = ThingStatus::Published;
        log::info!("thing {} published", self.thing_id);
        Ok(info)
    }

    /// Record an event on one of the topics this thing published.
    pub fn notify(&self, topic: &str, data: &str) -> Result<()> {
        if self.status != ThingStatus::Published {
            return Err(SafeThingError::InvalidStatus(format!(
                "thing {} is {}, events need a published thing",
                self.thing_id, self.status
            )));
        }
        if !self.topics.iter().any(|t| t.name == topic) {
            return Err(SafeThingError::InvalidParameters(format!(
                "topic {:?} is not registered by {}",
                topic, self.thing_id
            )));
        }

        log::debug!("event on {}/{}: {}", self.thing_id, topic, data);
        self.directory.push_event(&self.thing_id, topic, data)
    }

    /// Follow `topic` of the published thing `thing_id`. The subscription
    /// is kept in the directory, so it outlives this value.
    pub fn subscribe(&self, thing_id: &str, topic: &str) -> Result<()> {
        let info = self.get_thing_info(thing_id)?;
        if !info.topics.iter().any(|t| t.name == topic) {
            return Err(SafeThingError::InvalidParameters(format!(
                "{} does not publish topic {:?}",
                thing_id, topic
            )));
        }

        self.directory.subscribe(&self.thing_id, thing_id, topic)?;
        log::info!("{} subscribed to {}/{}", self.thing_id, thing_id, topic);
        Ok(())
    }

    pub fn subscriptions(&self) -> Result<Subscriptions> {
        self.directory.subscriptions(&self.thing_id)
    }

    /// Events recorded on every subscribed topic, grouped by publisher and
    /// topic, oldest first within a topic.
    pub fn subscribed_events(&self) -> Result<Vec<ThingEvent>> {
        let mut events = vec![];
        for (thing_id, topics) in self.subscriptions()? {
            for topic in topics {
                for data in self.directory.topic_events(&thing_id, &topic)? {
                    events.push(ThingEvent {
                        thing_id: thing_id.clone(),
                        topic: topic.clone(),
                        data,
                    });
                }
            }
        }
        Ok(events)
    }

    pub fn get_thing_info(&self, thing_id: &str) -> Result<ThingInfo> {
        self.directory
            .lookup(thing_id)?
            .ok_or_else(|| SafeThingError::NotFound(thing_id.to_owned()))
    }

    pub fn get_thing_status(&self, thing_id: &str) -> Result<ThingStatus> {
        Ok(self.get_thing_info(thing_id)?.status)
    }

    pub fn get_thing_addr_name(&self, thing_id: &str) -> Result<String> {
        Ok(self.get_thing_info(thing_id)?.addr_name)
    }

    pub fn get_thing_attrs(&self, thing_id: &str) -> Result<Vec<ThingAttr>> {
        Ok(self.get_thing_info(thing_id)?.attrs)
    }

    pub fn get_thing_topics(&self, thing_id: &str) -> Result<Vec<Topic>> {
        Ok(self.get_thing_info(thing_id)?.topics)
    }

    pub fn get_thing_actions(&self, thing_id: &str) -> Result<Vec<ActionDef>> {
        Ok(self.get_thing_info(thing_id)?.actions)
    }

    pub fn get_topic_events(
        &self,
        thing_id: &str,
        topic: &str,
    ) -> Result<Vec<String>> {
        self.directory.topic_events(thing_id, topic)
    }
}

impl fmt::Debug for SafeThing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeThing")
            .field("thing_id", &self.thing_id)
            .field("addr", &self.addr)
            .field("status", &self.status)
            .field("attrs", &self.attrs)
            .finish_non_exhaustive()
    }
}

impl Drop for SafeThing {
    fn drop(&mut self) {
        log::debug!("thing {} released ({})", self.thing_id, self.status);
    }
}
