//! Presence roster
//!
//! Storage is an unordered map; display order is computed on demand:
//! the current user first, then everyone else case-insensitively.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;

use chatbridge_protocol::{PresenceStatus, RosterRecord};

/// One row of the displayed roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterEntry {
    pub username: String,
    pub status: PresenceStatus,
}

/// Username to presence mapping for the current session
#[derive(Debug, Clone, Default)]
pub struct Roster {
    entries: HashMap<String, PresenceStatus>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a user; returns true if anything changed
    pub fn upsert(&mut self, username: impl Into<String>, status: PresenceStatus) -> bool {
        let username = username.into();
        self.entries.insert(username, status) != Some(status)
    }

    pub fn remove(&mut self, username: &str) -> Option<PresenceStatus> {
        self.entries.remove(username)
    }

    /// Replace every entry with `records`
    pub fn replace<I>(&mut self, records: I)
    where
        I: IntoIterator<Item = RosterRecord>,
    {
        self.entries = records
            .into_iter()
            .map(|record| (record.username, record.status))
            .collect();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, username: &str) -> Option<PresenceStatus> {
        self.entries.get(username).copied()
    }

    pub fn contains(&self, username: &str) -> bool {
        self.entries.contains_key(username)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Users that are online or in voice
    pub fn connected_count(&self) -> usize {
        self.entries.values().filter(|s| s.is_present()).count()
    }

    pub fn voice_count(&self) -> usize {
        self.entries
            .values()
            .filter(|s| **s == PresenceStatus::InVoice)
            .count()
    }

    /// Entries in display order
    pub fn display_order(&self, current_user: Option<&str>) -> Vec<RosterEntry> {
        let mut entries: Vec<RosterEntry> = self
            .entries
            .iter()
            .map(|(username, status)| RosterEntry {
                username: username.clone(),
                status: *status,
            })
            .collect();

        entries.sort_by(|a, b| display_cmp(&a.username, &b.username, current_user));
        entries
    }
}

fn display_cmp(a: &str, b: &str, current_user: Option<&str>) -> Ordering {
    match current_user {
        Some(me) if a == me => return Ordering::Less,
        Some(me) if b == me => return Ordering::Greater,
        _ => {}
    }
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}
