use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::ExplorerError;
use crate::filter::FilterSelection;
use crate::table::Table;

// URL-keyed cache of parsed downloads. An archive with no tabular entry is
// cached as None so a re-fetch does not hammer the source either.
#[derive(Debug, Clone, Default)]
pub struct FetchCache {
    entries: HashMap<String, Option<Table>>,
}

impl FetchCache {
    pub fn get(&self, url: &str) -> Option<&Option<Table>> {
        self.entries.get(url)
    }

    pub fn insert(&mut self, url: String, table: Option<Table>) {
        self.entries.insert(url, table);
    }

    pub fn invalidate(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// One Session per logical user; every handler receives it explicitly.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub projects: Option<Table>,
    pub publications: Option<Table>,
    pub aggregated: Option<Table>,
    pub combined: Option<Table>,
    pub aggregation_note: Option<String>,
    pub merge_note: Option<String>,
    pub last_fetch: Option<DateTime<Utc>>,
    pub selection: FilterSelection,
    pub force_refresh: bool,
    pub cache: FetchCache,
}

impl Session {
    pub fn data_loaded(&self) -> bool {
        self.projects.is_some() || self.publications.is_some()
    }

    pub fn combined(&self) -> Result<&Table, ExplorerError> {
        self.combined.as_ref().ok_or(ExplorerError::NothingLoaded)
    }

    // Restores the selection triple to its defaults; loaded tables stay.
    pub fn reset_filters(&mut self) {
        self.selection = FilterSelection::default();
    }
}
