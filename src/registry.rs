//! Loaded entries and their running sensors
//!
//! Owned by whoever hosts the bridge; there is no global state. Each entry
//! maps to one module and one [`SensorHandle`] per enabled descriptor.

use crate::decoder::SensorState;
use crate::entity::{SensorEntity, SensorHandle};
use crate::flow::EntryData;
use crate::mqtt::PubSubChannel;
use crate::topics::ModuleIdentity;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum RegistryError {
    /// No entry with this id is loaded
    #[error("Unknown entry: {0}")]
    UnknownEntry(String),

    /// The entry id is already loaded
    #[error("Entry already loaded: {0}")]
    AlreadyLoaded(String),
}

struct LoadedEntry {
    data: EntryData,
    handles: Vec<SensorHandle>,
}

#[derive(Default)]
pub struct ModuleRegistry {
    entries: BTreeMap<String, LoadedEntry>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts one sensor per enabled descriptor; returns how many started.
    ///
    /// A sensor whose subscription fails is logged and left out.
    pub fn setup_entry<C>(
        &mut self,
        entry_id: &str,
        data: EntryData,
        channel: &C,
    ) -> Result<usize, RegistryError>
    where
        C: PubSubChannel + ?Sized,
    {
        if self.entries.contains_key(entry_id) {
            return Err(RegistryError::AlreadyLoaded(entry_id.to_string()));
        }

        let mut handles = Vec::new();
        for descriptor in data.sensors.values().filter(|d| d.enabled) {
            let entity = SensorEntity::create(&data.module_path, descriptor.clone());
            match SensorHandle::start(entity, channel) {
                Ok(handle) => handles.push(handle),
                Err(e) => warn!("Skipping sensor {}: {}", descriptor.topic, e),
            }
        }

        let started = handles.len();
        info!(
            "Set up entry {} for {} with {} sensor(s)",
            entry_id, data.module_path, started
        );
        self.entries
            .insert(entry_id.to_string(), LoadedEntry { data, handles });
        Ok(started)
    }

    /// Stops every sensor of the entry and forgets it
    pub async fn unload_entry<C>(
        &mut self,
        entry_id: &str,
        channel: &C,
    ) -> Result<EntryData, RegistryError>
    where
        C: PubSubChannel + ?Sized,
    {
        let mut entry = self
            .entries
            .remove(entry_id)
            .ok_or_else(|| RegistryError::UnknownEntry(entry_id.to_string()))?;

        for handle in entry.handles.iter_mut() {
            if let Err(e) = handle.shutdown(channel).await {
                error!("Failed to stop sensor {}: {}", handle.topic, e);
            }
        }
        info!("Unloaded entry {}", entry_id);
        Ok(entry.data)
    }

    /// Unloads and sets up again with `data`
    pub async fn reload_entry<C>(
        &mut self,
        entry_id: &str,
        data: EntryData,
        channel: &C,
    ) -> Result<usize, RegistryError>
    where
        C: PubSubChannel + ?Sized,
    {
        debug!("Reloading entry {}", entry_id);
        self.unload_entry(entry_id, channel).await?;
        self.setup_entry(entry_id, data, channel)
    }

    pub async fn unload_all<C>(&mut self, channel: &C)
    where
        C: PubSubChannel + ?Sized,
    {
        let ids: Vec<String> = self.entry_ids().map(str::to_string).collect();
        for id in ids {
            if let Err(e) = self.unload_entry(&id, channel).await {
                error!("{}", e);
            }
        }
    }

    /// Current state per sensor topic
    pub fn states(&self, entry_id: &str) -> Option<BTreeMap<String, Option<SensorState>>> {
        self.entries.get(entry_id).map(|entry| {
            entry
                .handles
                .iter()
                .map(|h| (h.topic.clone(), h.state()))
                .collect()
        })
    }

    pub fn handles(&self, entry_id: &str) -> &[SensorHandle] {
        self.entries
            .get(entry_id)
            .map(|entry| entry.handles.as_slice())
            .unwrap_or_default()
    }

    pub fn entry(&self, entry_id: &str) -> Option<&EntryData> {
        self.entries.get(entry_id).map(|entry| &entry.data)
    }

    pub fn entry_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Modules with a loaded entry, for the already-configured check
    pub fn configured_modules(&self) -> BTreeSet<ModuleIdentity> {
        self.entries
            .values()
            .map(|entry| entry.data.module_path.clone())
            .collect()
    }
}
