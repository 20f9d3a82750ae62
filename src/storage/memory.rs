//! In-memory cycle store. Same lease semantics as the SQLite store, no durability.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::traits::{CycleFilter, CycleStore, Lease};
use crate::domain::IssueCycle;
use crate::error::{CyclrError, Result};

#[derive(Debug, Default)]
struct Entry {
    cycle: Option<IssueCycle>,
    lease: Option<Lease>,
    cancel: Option<String>,
}

#[derive(Debug, Default)]
pub struct MemoryCycleStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCycleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CycleStore for MemoryCycleStore {
    fn acquire(&self, issue_id: &str, owner: &str, ttl: Duration, now: DateTime<Utc>) -> Result<Lease> {
        let mut entries = self.entries();
        let entry = entries.entry(issue_id.to_string()).or_default();

        if let Some(current) = entry
            .lease
            .as_ref()
            .filter(|l| l.owner != owner && !l.is_expired(now))
        {
            return Err(CyclrError::LeaseHeld {
                issue_id: issue_id.to_string(),
                owner: current.owner.clone(),
                expires_at: current.expires_at.to_rfc3339(),
            });
        }

        let lease = Lease::new(issue_id, owner, ttl, now);
        entry.lease = Some(lease.clone());
        Ok(lease)
    }

    fn load(&self, issue_id: &str) -> Result<Option<IssueCycle>> {
        Ok(self.entries().get(issue_id).and_then(|e| e.cycle.clone()))
    }

    fn commit(&self, cycle: &IssueCycle, lease: &Lease, ttl: Duration, now: DateTime<Utc>) -> Result<Lease> {
        let mut entries = self.entries();
        let entry = entries
            .get_mut(cycle.issue_id())
            .filter(|e| e.lease.as_ref().is_some_and(|l| l.owner == lease.owner))
            .ok_or_else(|| CyclrError::LeaseLost(cycle.issue_id().to_string()))?;

        let renewed = Lease::new(cycle.issue_id(), &lease.owner, ttl, now);
        entry.cycle = Some(cycle.clone());
        entry.lease = Some(renewed.clone());
        Ok(renewed)
    }

    fn renew(&self, lease: &Lease, ttl: Duration, now: DateTime<Utc>) -> Result<Lease> {
        let mut entries = self.entries();
        let entry = entries
            .get_mut(&lease.issue_id)
            .filter(|e| e.lease.as_ref().is_some_and(|l| l.owner == lease.owner))
            .ok_or_else(|| CyclrError::LeaseLost(lease.issue_id.clone()))?;

        let renewed = Lease::new(&lease.issue_id, &lease.owner, ttl, now);
        entry.lease = Some(renewed.clone());
        Ok(renewed)
    }

    fn release(&self, lease: &Lease) -> Result<()> {
        let mut entries = self.entries();
        let held = entries
            .get(&lease.issue_id)
            .and_then(|e| e.lease.as_ref())
            .is_some_and(|l| l.owner == lease.owner);
        if !held {
            return Ok(());
        }
        let committed = match entries.get_mut(&lease.issue_id) {
            Some(entry) => {
                entry.lease = None;
                entry.cycle.is_some()
            }
            None => true,
        };
        if !committed {
            entries.remove(&lease.issue_id);
        }
        Ok(())
    }

    fn lease(&self, issue_id: &str) -> Result<Option<Lease>> {
        Ok(self.entries().get(issue_id).and_then(|e| e.lease.clone()))
    }

    fn list(&self, filter: &CycleFilter) -> Result<Vec<IssueCycle>> {
        let mut cycles: Vec<IssueCycle> = self
            .entries()
            .values()
            .filter_map(|e| e.cycle.clone())
            .filter(|c| filter.matches(c))
            .collect();
        cycles.sort_by(|a, b| b.updated_at().cmp(&a.updated_at()));
        Ok(cycles)
    }

    fn request_cancel(&self, issue_id: &str, reason: &str) -> Result<bool> {
        let mut entries = self.entries();
        match entries.get_mut(issue_id) {
            Some(entry) if entry.cycle.as_ref().is_some_and(|c| !c.is_terminal()) => {
                entry.cancel = Some(reason.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn cancel_request(&self, issue_id: &str) -> Result<Option<String>> {
        Ok(self.entries().get(issue_id).and_then(|e| e.cancel.clone()))
    }
}
