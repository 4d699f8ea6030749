use chrono::NaiveDateTime;
use serde_json::{json, Value};
use std::collections::HashSet;

use crate::models::record::{format_odoo_datetime, ChangeRecord};
use crate::services::recent_ids::RecentIds;

/// Change-detection boundary for one category: the newest modification time
/// seen so far plus the ids notified recently.
#[derive(Debug, Clone)]
pub struct Watermark {
    initialized: bool,
    last_seen_modified_at: Option<NaiveDateTime>,
    recent_ids: RecentIds<i64>,
}

impl Watermark {
    pub fn new(capacity: usize) -> Self {
        Self {
            initialized: false,
            last_seen_modified_at: None,
            recent_ids: RecentIds::with_capacity(capacity),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn last_seen(&self) -> Option<NaiveDateTime> {
        self.last_seen_modified_at
    }

    pub fn recent_ids(&self) -> &RecentIds<i64> {
        &self.recent_ids
    }

    /// Seeds the boundary from the newest record that already existed when the
    /// process started. `None` means the category was empty.
    pub fn initialize(&mut self, newest_existing: Option<NaiveDateTime>) {
        self.initialized = true;
        self.last_seen_modified_at = newest_existing;
    }

    /// Domain clause restricting the next query to records modified after
    /// the boundary.
    pub fn filter_clause(&self) -> Option<Value> {
        self.last_seen_modified_at
            .map(|ts| json!(["write_date", ">", format_odoo_datetime(&ts)]))
    }

    /// Keeps the records that were neither notified recently nor at or below
    /// the boundary. Nothing is remembered until `commit`.
    pub fn admit(&self, records: Vec<ChangeRecord>) -> Vec<ChangeRecord> {
        let boundary = self.last_seen_modified_at;
        let mut seen = HashSet::new();

        records
            .into_iter()
            .filter(|record| !self.recent_ids.contains(&record.id))
            .filter(|record| match (boundary, record.write_date) {
                (Some(boundary), Some(modified)) => modified > boundary,
                _ => true,
            })
            .filter(|record| seen.insert(record.id))
            .collect()
    }

    /// Records the admitted ids and moves the boundary forward. Called once
    /// the whole batch has been resolved.
    pub fn commit(&mut self, admitted: &[ChangeRecord], newest: Option<NaiveDateTime>) {
        for record in admitted {
            self.recent_ids.insert(record.id);
        }
        self.advance(newest);
    }

    /// Moves the boundary forward to the newest modification seen this cycle.
    pub fn advance(&mut self, newest: Option<NaiveDateTime>) {
        if let Some(newest) = newest {
            if self.last_seen_modified_at.map_or(true, |current| newest > current) {
                self.last_seen_modified_at = Some(newest);
            }
        }
    }
}

pub fn newest_modification(records: &[ChangeRecord]) -> Option<NaiveDateTime> {
    records.iter().filter_map(|r| r.write_date).max()
}
