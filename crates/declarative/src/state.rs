//! Persisted record of what has been applied
//!
//! The snapshot is the only memory the engine has between runs: the planner
//! diffs the desired graph against it and the executor rewrites it after every
//! successful step, so a crash mid-apply loses at most the step in flight.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::StateError;
use crate::resource::{PropertyBag, ResourceNode};
use crate::types::{Outputs, ResourceId};

/// Snapshot format version written by this crate
pub const STATE_VERSION: u32 = 1;

// ============================================================================
// Records
// ============================================================================

/// Last applied form of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub id: ResourceId,
    /// Declared properties, references unresolved
    pub properties: PropertyBag,
    /// Properties as sent to the provider
    #[serde(default)]
    pub inputs: Outputs,
    #[serde(default)]
    pub outputs: Outputs,
    /// Direct dependencies at apply time; orders deletes once the node leaves the desired graph
    #[serde(default)]
    pub dependencies: Vec<ResourceId>,
    #[serde(default)]
    pub protect: bool,
    /// Checksum of the declared definition
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
}

impl StateRecord {
    pub fn from_node(
        node: &ResourceNode,
        inputs: Outputs,
        outputs: Outputs,
        dependencies: Vec<ResourceId>,
    ) -> Self {
        Self {
            id: node.id().clone(),
            properties: node.properties().clone(),
            inputs,
            outputs,
            dependencies,
            protect: node.is_protected(),
            checksum: node.definition_checksum(),
            applied_at: Utc::now(),
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Everything known to be applied for one stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    /// Incremented on every save
    pub serial: u64,
    pub updated_at: DateTime<Utc>,
    /// blake3 of the serialized records
    pub checksum: String,
    #[serde(default)]
    pub records: BTreeMap<String, StateRecord>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        let mut snapshot = Self {
            version: STATE_VERSION,
            serial: 0,
            updated_at: Utc::now(),
            checksum: String::new(),
            records: BTreeMap::new(),
        };
        snapshot.checksum = snapshot.compute_checksum();
        snapshot
    }
}

impl StateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ResourceId) -> Option<&StateRecord> {
        self.records.get(&id.to_string())
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.records.contains_key(&id.to_string())
    }

    pub fn upsert(&mut self, record: StateRecord) {
        self.records.insert(record.id.to_string(), record);
    }

    pub fn remove(&mut self, id: &ResourceId) -> Option<StateRecord> {
        self.records.remove(&id.to_string())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in lexical id order
    pub fn records(&self) -> impl Iterator<Item = &StateRecord> {
        self.records.values()
    }

    pub fn compute_checksum(&self) -> String {
        let bytes = serde_json::to_vec(&self.records).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }

    /// Advance the serial and refresh timestamp and checksum ahead of a save
    pub fn seal(&mut self) {
        self.serial += 1;
        self.updated_at = Utc::now();
        self.checksum = self.compute_checksum();
    }

    /// Tracked resources that recorded a dependency on `id`, sorted
    pub fn dependents_of(&self, id: &ResourceId) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self
            .records
            .values()
            .filter(|record| record.dependencies.contains(id))
            .map(|record| record.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Longest recorded dependency chain below each tracked resource
    ///
    /// Dependencies that are no longer tracked are ignored.
    pub fn ranks(&self) -> HashMap<ResourceId, usize> {
        let mut ranks = HashMap::new();
        for record in self.records.values() {
            self.rank_of(&record.id, &mut ranks, &mut HashSet::new());
        }
        ranks
    }

    fn rank_of(
        &self,
        id: &ResourceId,
        ranks: &mut HashMap<ResourceId, usize>,
        visiting: &mut HashSet<ResourceId>,
    ) -> usize {
        if let Some(&rank) = ranks.get(id) {
            return rank;
        }
        let Some(record) = self.get(id) else {
            return 0;
        };
        if !visiting.insert(id.clone()) {
            return 0;
        }

        let rank = record
            .dependencies
            .iter()
            .filter(|dep| self.contains(dep))
            .map(|dep| self.rank_of(dep, ranks, visiting) + 1)
            .max()
            .unwrap_or(0);

        visiting.remove(id);
        ranks.insert(id.clone(), rank);
        rank
    }
}

// ============================================================================
// Stores
// ============================================================================

/// Durable home of a snapshot
pub trait StateStore: Send {
    /// Read the last saved snapshot, or an empty one if nothing was saved yet
    fn load(&self) -> Result<StateSnapshot, StateError>;

    /// Persist a snapshot whose serial is newer than the stored one
    fn save(&mut self, snapshot: &StateSnapshot) -> Result<(), StateError>;
}

/// JSON file written atomically through a temp file in the same directory
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

#[derive(Deserialize)]
struct StoredSerial {
    serial: u64,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StateError {
        StateError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn stored_serial(&self) -> Result<Option<u64>, StateError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        let stored: StoredSerial =
            serde_json::from_str(&content).map_err(|source| StateError::Serde {
                path: self.path.clone(),
                source,
            })?;
        Ok(Some(stored.serial))
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<StateSnapshot, StateError> {
        if !self.path.exists() {
            log::debug!("State file {} does not exist, starting empty", self.path.display());
            return Ok(StateSnapshot::new());
        }

        let content = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        let snapshot: StateSnapshot =
            serde_json::from_str(&content).map_err(|source| StateError::Serde {
                path: self.path.clone(),
                source,
            })?;

        if snapshot.version > STATE_VERSION {
            return Err(StateError::UnsupportedVersion {
                found: snapshot.version,
                supported: STATE_VERSION,
            });
        }

        let expected = snapshot.compute_checksum();
        if snapshot.checksum != expected {
            return Err(StateError::Corrupt {
                path: self.path.clone(),
                expected,
                found: snapshot.checksum,
            });
        }

        log::debug!(
            "Loaded state from {} (serial {}, {} records)",
            self.path.display(),
            snapshot.serial,
            snapshot.len()
        );
        Ok(snapshot)
    }

    fn save(&mut self, snapshot: &StateSnapshot) -> Result<(), StateError> {
        if let Some(stored) = self.stored_serial()?
            && stored >= snapshot.serial
        {
            return Err(StateError::Stale {
                stored,
                attempted: snapshot.serial,
            });
        }

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;

        let mut file = NamedTempFile::new_in(&dir).map_err(|e| self.io_error(e))?;
        serde_json::to_writer_pretty(&mut file, snapshot).map_err(|source| StateError::Serde {
            path: self.path.clone(),
            source,
        })?;
        file.write_all(b"\n").map_err(|e| self.io_error(e))?;
        file.as_file().sync_all().map_err(|e| self.io_error(e))?;
        file.persist(&self.path).map_err(|e| self.io_error(e.error))?;

        log::debug!(
            "Saved state to {} (serial {})",
            self.path.display(),
            snapshot.serial
        );
        Ok(())
    }
}

/// Snapshot kept in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    snapshot: Option<StateSnapshot>,
    saves: usize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves
    pub fn saves(&self) -> usize {
        self.saves
    }

    pub fn snapshot(&self) -> Option<&StateSnapshot> {
        self.snapshot.as_ref()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<StateSnapshot, StateError> {
        Ok(self.snapshot.clone().unwrap_or_default())
    }

    fn save(&mut self, snapshot: &StateSnapshot) -> Result<(), StateError> {
        if let Some(stored) = &self.snapshot
            && stored.serial >= snapshot.serial
        {
            return Err(StateError::Stale {
                stored: stored.serial,
                attempted: snapshot.serial,
            });
        }
        self.snapshot = Some(snapshot.clone());
        self.saves += 1;
        Ok(())
    }
}
