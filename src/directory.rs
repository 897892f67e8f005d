use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::atomic::{load_json, modify_json, AtomicFile};
use crate::id::ThingAddr;
use crate::thing::ThingInfo;
use crate::{Result, SafeThingError};

pub const THINGS_FOLDER: &str = "things";
pub const SUBSCRIPTIONS_FOLDER: &str = "subscriptions";

/// Topics a subscriber follows, keyed by the identifier of the publisher.
pub type Subscriptions = BTreeMap<String, BTreeSet<String>>;

/// Where published things become discoverable by their identifier.
pub trait Directory: Send + Sync {
    /// Insert or replace the snapshot of a thing. Recorded events survive.
    fn publish(&self, info: &ThingInfo) -> Result<()>;

    fn lookup(&self, thing_id: &str) -> Result<Option<ThingInfo>>;

    /// Append `data` to the events of `topic`. The thing must be published.
    fn push_event(&self, thing_id: &str, topic: &str, data: &str)
        -> Result<()>;

    /// Events recorded on `topic`, oldest first.
    fn topic_events(&self, thing_id: &str, topic: &str) -> Result<Vec<String>>;

    /// Record that `subscriber` follows `topic` of `thing_id`.
    fn subscribe(
        &self,
        subscriber: &str,
        thing_id: &str,
        topic: &str,
    ) -> Result<()>;

    fn subscriptions(&self, subscriber: &str) -> Result<Subscriptions>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Entry {
    info: ThingInfo,
    #[serde(default)]
    events: BTreeMap<String, Vec<String>>,
}

impl Entry {
    fn new(info: ThingInfo) -> Self {
        Entry {
            info,
            events: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SubscriberEntry {
    subscriber: String,
    things: Subscriptions,
}

fn not_found(thing_id: &str) -> SafeThingError {
    SafeThingError::NotFound(thing_id.to_owned())
}

/// Directory living as long as the process.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    entries: RwLock<HashMap<String, Entry>>,
    subscriptions: RwLock<HashMap<String, Subscriptions>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .map(|entries| entries.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Directory for MemoryDirectory {
    fn publish(&self, info: &ThingInfo) -> Result<()> {
        self.entries
            .write()?
            .entry(info.id.clone())
            .and_modify(|entry| entry.info = info.clone())
            .or_insert_with(|| Entry::new(info.clone()));
        Ok(())
    }

    fn lookup(&self, thing_id: &str) -> Result<Option<ThingInfo>> {
        let entries = self.entries.read()?;
        Ok(entries.get(thing_id).map(|entry| entry.info.clone()))
    }

    fn push_event(
        &self,
        thing_id: &str,
        topic: &str,
        data: &str,
    ) -> Result<()> {
        let mut entries = self.entries.write()?;
        let entry = entries
            .get_mut(thing_id)
            .ok_or_else(|| not_found(thing_id))?;
        entry
            .events
            .entry(topic.to_owned())
            .or_default()
            .push(data.to_owned());
        Ok(())
    }

    fn topic_events(&self, thing_id: &str, topic: &str) -> Result<Vec<String>> {
        let entries = self.entries.read()?;
        let entry = entries.get(thing_id).ok_or_else(|| not_found(thing_id))?;
        Ok(entry.events.get(topic).cloned().unwrap_or_default())
    }

    fn subscribe(
        &self,
        subscriber: &str,
        thing_id: &str,
        topic: &str,
    ) -> Result<()> {
        self.subscriptions
            .write()?
            .entry(subscriber.to_owned())
            .or_default()
            .entry(thing_id.to_owned())
            .or_default()
            .insert(topic.to_owned());
        Ok(())
    }

    fn subscriptions(&self, subscriber: &str) -> Result<Subscriptions> {
        let subscriptions = self.subscriptions.read()?;
        Ok(subscriptions.get(subscriber).cloned().unwrap_or_default())
    }
}

/// Directory persisted under `<root>/things/<address name>/`, one atomic
/// JSON file per thing. Subscriptions live next to it in
/// `<root>/subscriptions/<address name>/`, one file per subscriber.
/// Several processes may share the same root.
#[derive(Clone, Debug)]
pub struct FileDirectory {
    things: PathBuf,
    subscriptions: PathBuf,
}

impl FileDirectory {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let things = root.as_ref().join(THINGS_FOLDER);
        let subscriptions = root.as_ref().join(SUBSCRIPTIONS_FOLDER);
        std::fs::create_dir_all(&things)?;
        std::fs::create_dir_all(&subscriptions)?;
        log::info!("publication directory at {}", root.as_ref().display());
        Ok(FileDirectory {
            things,
            subscriptions,
        })
    }

    fn file(&self, thing_id: &str) -> Result<AtomicFile> {
        let addr = ThingAddr::compute(thing_id);
        Ok(AtomicFile::new(self.things.join(addr.to_string()))?)
    }

    fn subscriptions_file(&self, subscriber: &str) -> Result<AtomicFile> {
        let addr = ThingAddr::compute(subscriber);
        Ok(AtomicFile::new(self.subscriptions.join(addr.to_string()))?)
    }

    fn load_entry(&self, thing_id: &str) -> Result<Option<Entry>> {
        let entry: Option<Entry> = load_json(&self.file(thing_id)?)?;
        match entry {
            Some(entry) if entry.info.id != thing_id => {
                Err(collision(thing_id, &entry.info.id))
            }
            entry => Ok(entry),
        }
    }

    /// Apply `operator` to the stored entry of `thing_id`, refusing to touch
    /// an entry stored by a colliding identifier.
    fn modify_entry(
        &self,
        thing_id: &str,
        mut operator: impl FnMut(&mut Option<Entry>) -> Result<()>,
    ) -> Result<()> {
        let file = self.file(thing_id)?;
        modify_json(&file, |current: &mut Option<Entry>| {
            if let Some(entry) = current.as_ref() {
                if entry.info.id != thing_id {
                    return Err(collision(thing_id, &entry.info.id));
                }
            }
            operator(current)
        })?
    }
}

fn collision(thing_id: &str, stored: &str) -> SafeThingError {
    SafeThingError::Collision(format!(
        "{} shares its address with {}",
        thing_id, stored
    ))
}

impl Directory for FileDirectory {
    fn publish(&self, info: &ThingInfo) -> Result<()> {
        self.modify_entry(&info.id, |current| {
            match current {
                Some(entry) => {
                    log::debug!(
                        "replacing snapshot of {} ({} topics with events)",
                        info.id,
                        entry.events.len()
                    );
                    entry.info = info.clone();
                }
                None => *current = Some(Entry::new(info.clone())),
            }
            Ok(())
        })
    }

    fn lookup(&self, thing_id: &str) -> Result<Option<ThingInfo>> {
        Ok(self.load_entry(thing_id)?.map(|entry| entry.info))
    }

    fn push_event(
        &self,
        thing_id: &str,
        topic: &str,
        data: &str,
    ) -> Result<()> {
        if self.load_entry(thing_id)?.is_none() {
            return Err(not_found(thing_id));
        }
        self.modify_entry(thing_id, |current| {
            let entry = current.as_mut().ok_or_else(|| not_found(thing_id))?;
            entry
                .events
                .entry(topic.to_owned())
                .or_default()
                .push(data.to_owned());
            Ok(())
        })
    }

    fn topic_events(&self, thing_id: &str, topic: &str) -> Result<Vec<String>> {
        let entry = self
            .load_entry(thing_id)?
            .ok_or_else(|| not_found(thing_id))?;
        Ok(entry.events.get(topic).cloned().unwrap_or_default())
    }

    fn subscribe(
        &self,
        subscriber: &str,
        thing_id: &str,
        topic: &str,
    ) -> Result<()> {
        let file = self.subscriptions_file(subscriber)?;
        modify_json(&file, |current: &mut Option<SubscriberEntry>| {
            let entry = current.get_or_insert_with(|| SubscriberEntry {
                subscriber: subscriber.to_owned(),
                things: Subscriptions::new(),
            });
            if entry.subscriber != subscriber {
                return Err(collision(subscriber, &entry.subscriber));
            }
            entry
                .things
                .entry(thing_id.to_owned())
                .or_default()
                .insert(topic.to_owned());
            Ok(())
        })?
    }

    fn subscriptions(&self, subscriber: &str) -> Result<Subscriptions> {
        let file = self.subscriptions_file(subscriber)?;
        match load_json::<SubscriberEntry>(&file)? {
            Some(entry) if entry.subscriber != subscriber => {
                Err(collision(subscriber, &entry.subscriber))
            }
            Some(entry) => Ok(entry.things),
            None => Ok(Subscriptions::new()),
        }
    }
}
