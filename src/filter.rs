use std::collections::BTreeSet;

use serde::Serialize;

use crate::aggregate::{ORGANIZATIONS_COLUMN, PROJECT_ID_COLUMN};
use crate::join::PROJECT_SUFFIX;
use crate::table::Table;

pub const ALL: &str = "All";
pub const PREVIEW_ROWS: usize = 500;
pub const ACRONYM_COLUMN: &str = "projectAcronym";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterSelection {
    pub acronym: String,
    pub organization: String,
    pub project_id: String,
}

impl Default for FilterSelection {
    fn default() -> Self {
        Self {
            acronym: ALL.to_string(),
            organization: ALL.to_string(),
            project_id: String::new(),
        }
    }
}

impl FilterSelection {
    pub fn is_default(&self) -> bool {
        self == &Self::default()
    }
}

// Post-join the acronym column usually carries the project-side suffix; fall
// back to the bare name for tables that never collided.
pub fn acronym_column(table: &Table) -> Option<usize> {
    table
        .column_index(&format!("{ACRONYM_COLUMN}{PROJECT_SUFFIX}"))
        .or_else(|| table.column_index(ACRONYM_COLUMN))
}

// Pure conjunction of the three predicates, original row order preserved.
// An active filter whose column is missing matches nothing rather than
// silently matching everything.
pub fn matching_rows(table: &Table, selection: &FilterSelection) -> Vec<usize> {
    let acronym = (selection.acronym != ALL).then_some(selection.acronym.as_str());
    let organization = (selection.organization != ALL).then_some(selection.organization.as_str());
    let query = selection.project_id.trim();

    let acronym_index = acronym_column(table);
    let orgs_index = table.column_index(ORGANIZATIONS_COLUMN);
    let id_index = table.column_index(PROJECT_ID_COLUMN);

    table
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, row)| {
            if let Some(wanted) = acronym {
                match acronym_index {
                    Some(index) => {
                        if row[index] != wanted {
                            return false;
                        }
                    }
                    None => return false,
                }
            }
            if let Some(wanted) = organization {
                match orgs_index {
                    Some(index) => {
                        if !contains_organization(&row[index], wanted) {
                            return false;
                        }
                    }
                    None => return false,
                }
            }
            if !query.is_empty() {
                match id_index {
                    Some(index) => {
                        if row[index].trim() != query {
                            return false;
                        }
                    }
                    None => return false,
                }
            }
            true
        })
        .map(|(index, _)| index)
        .collect()
}

// Case-sensitive, unanchored occurrence, guarded so a name never matches
// inside a longer word: "Aalborg" hits "Aalborg University" but not
// "Aalborg-less Org".
fn contains_organization(field: &str, name: &str) -> bool {
    if name.is_empty() {
        return true;
    }
    let mut offset = 0;
    while let Some(position) = field[offset..].find(name) {
        let start = offset + position;
        let end = start + name.len();
        let before = field[..start].chars().next_back();
        let after = field[end..].chars().next();
        if !before.is_some_and(is_name_char) && !after.is_some_and(is_name_char) {
            return true;
        }
        match field[start..].chars().next() {
            Some(ch) => offset = start + ch.len_utf8(),
            None => break,
        }
    }
    false
}

fn is_name_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '-'
}

pub fn acronym_options(table: &Table) -> Vec<String> {
    let Some(index) = acronym_column(table) else {
        return Vec::new();
    };
    let unique: BTreeSet<String> = table
        .rows()
        .iter()
        .map(|row| row[index].trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect();
    unique.into_iter().collect()
}

pub fn organization_options(table: &Table) -> Vec<String> {
    let Some(index) = table.column_index(ORGANIZATIONS_COLUMN) else {
        return Vec::new();
    };
    let mut unique = BTreeSet::new();
    for row in table.rows() {
        for name in row[index].split(';') {
            let name = name.trim();
            if !name.is_empty() {
                unique.insert(name.to_string());
            }
        }
    }
    unique.into_iter().collect()
}
