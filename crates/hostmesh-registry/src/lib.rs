//! hostmesh registry -- the in-memory table of known hosts.
//!
//! One mutex guards the whole table. Every read-modify-write and every
//! snapshot happens under it; callers never see a live iterator and the lock
//! is never held across I/O.
//!
//! Iteration order is insertion order, which makes failover selection
//! deterministic across calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hostmesh_protocol::{HostName, HostRecord, HostStatus, StatusUpdate};

/// Whether an upsert created a record or merged into an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// A host demoted by a monitor sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleHost {
    pub name: HostName,
    pub silent_for_secs: i64,
}

#[derive(Default)]
struct Table {
    hosts: HashMap<HostName, HostRecord>,
    order: Vec<HostName>,
}

impl Table {
    fn records(&self) -> impl Iterator<Item = &HostRecord> {
        self.order.iter().filter_map(|name| self.hosts.get(name))
    }

    fn insert_new(&mut self, record: HostRecord) {
        self.order.push(record.name.clone());
        self.hosts.insert(record.name.clone(), record);
    }

    fn upsert(&mut self, record: HostRecord) -> UpsertOutcome {
        match self.hosts.get_mut(&record.name) {
            Some(existing) => {
                existing.address = record.address;
                existing.port = record.port;
                existing.status = record.status;
                existing.players = record.players;
                existing.memory_usage = record.memory_usage;
                existing.cpu_usage = record.cpu_usage;
                existing.last_seen = existing.last_seen.max(record.last_seen);
                UpsertOutcome::Updated
            }
            None => {
                self.insert_new(record);
                UpsertOutcome::Created
            }
        }
    }
}

/// Thread-safe host table. Cheap to clone; clones share the same table.
#[derive(Clone, Default)]
pub struct HostRegistry {
    inner: Arc<Mutex<Table>>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Every mutation completes under one guard, so a poisoned table is
    // still consistent.
    fn table(&self) -> MutexGuard<'_, Table> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merge `record` into the table, creating it if absent.
    /// `last_seen` never moves backwards.
    pub fn upsert(&self, record: HostRecord) -> UpsertOutcome {
        self.table().upsert(record)
    }

    /// Record a `register` from the host itself: fresh online record at `now`.
    pub fn register(
        &self,
        name: &str,
        address: &str,
        port: u16,
        now: DateTime<Utc>,
    ) -> UpsertOutcome {
        let outcome = self.upsert(HostRecord::new(name, address, port, now));
        tracing::info!(
            host = name,
            address,
            port,
            created = outcome == UpsertOutcome::Created,
            "registry: host registered"
        );
        outcome
    }

    /// Refresh `last_seen` and mark online. Returns false for unknown hosts.
    pub fn heartbeat(&self, name: &str, now: DateTime<Utc>) -> bool {
        let mut table = self.table();
        let Some(host) = table.hosts.get_mut(name) else {
            return false;
        };
        if !host.status.is_online() {
            tracing::info!(host = name, "registry: host back online");
        }
        host.last_seen = host.last_seen.max(now);
        host.status = HostStatus::Online;
        true
    }

    /// Apply a `status_update` from the host itself. An online report also
    /// counts as proof of life. Returns false for unknown hosts.
    pub fn apply_status(&self, update: &StatusUpdate, now: DateTime<Utc>) -> bool {
        let mut table = self.table();
        let Some(host) = table.hosts.get_mut(&update.name) else {
            return false;
        };
        host.players = update.players.iter().cloned().collect();
        host.memory_usage = update.memory_usage;
        host.cpu_usage = update.cpu_usage;
        host.status = update.status;
        if update.status.is_online() {
            host.last_seen = host.last_seen.max(now);
        }
        true
    }

    /// Add a player to a host. Adding a present player is a no-op.
    /// Returns false for unknown hosts.
    pub fn add_player(&self, name: &str, player: &str) -> bool {
        let mut table = self.table();
        let Some(host) = table.hosts.get_mut(name) else {
            return false;
        };
        if host.players.insert(player.to_string()) {
            tracing::info!(host = name, player, "registry: player joined");
        }
        true
    }

    /// Remove a player from a host. Removing an absent player is a no-op.
    /// Returns false for unknown hosts.
    pub fn remove_player(&self, name: &str, player: &str) -> bool {
        let mut table = self.table();
        let Some(host) = table.hosts.get_mut(name) else {
            return false;
        };
        if host.players.remove(player) {
            tracing::info!(host = name, player, "registry: player left");
        }
        true
    }

    /// Fold a peer's snapshot into the table. Only names we have never seen
    /// are inserted; local knowledge of a known name always wins.
    /// Returns the names that were added.
    pub fn merge_remote(&self, records: Vec<HostRecord>) -> Vec<HostName> {
        let mut table = self.table();
        let mut added = Vec::new();
        for record in records {
            if record.name.is_empty() || table.hosts.contains_key(&record.name) {
                continue;
            }
            added.push(record.name.clone());
            table.insert_new(record);
        }
        added
    }

    /// Demote every online host silent for longer than `timeout`.
    /// Never removes records.
    pub fn mark_stale(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<StaleHost> {
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        let mut table = self.table();
        let mut demoted = Vec::new();
        for host in table.hosts.values_mut() {
            let silence = now.signed_duration_since(host.last_seen);
            if host.status.is_online() && silence > timeout {
                host.status = HostStatus::Offline;
                demoted.push(StaleHost {
                    name: host.name.clone(),
                    silent_for_secs: silence.num_seconds(),
                });
            }
        }
        demoted
    }

    pub fn get(&self, name: &str) -> Option<HostRecord> {
        self.table().hosts.get(name).cloned()
    }

    /// Delete a record. Returns false if it was absent.
    pub fn remove(&self, name: &str) -> bool {
        let mut table = self.table();
        if table.hosts.remove(name).is_none() {
            return false;
        }
        table.order.retain(|n| n != name);
        tracing::info!(host = name, remaining = table.hosts.len(), "registry: host removed");
        true
    }

    /// Consistent snapshot of every record, in insertion order.
    pub fn list_all(&self) -> Vec<HostRecord> {
        self.table().records().cloned().collect()
    }

    /// First online host other than `exclude`, in insertion order.
    ///
    /// Trusts the `status` flag as-is: a host that died after its last
    /// heartbeat is still offered until the monitor demotes it.
    pub fn select_failover_candidate(&self, exclude: &str) -> Option<HostRecord> {
        self.table()
            .records()
            .find(|h| h.status.is_online() && h.name != exclude)
            .cloned()
    }

    /// Count hosts as (online, offline).
    pub fn status_counts(&self) -> (usize, usize) {
        let table = self.table();
        let online = table.hosts.values().filter(|h| h.status.is_online()).count();
        (online, table.hosts.len() - online)
    }

    pub fn len(&self) -> usize {
        self.table().hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().hosts.is_empty()
    }
}
