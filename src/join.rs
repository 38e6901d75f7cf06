use std::collections::{BTreeSet, HashMap, HashSet};

use crate::aggregate::{ORGANIZATION_SEPARATOR, ORGANIZATIONS_COLUMN, PROJECT_ID_COLUMN};
use crate::error::ExplorerError;
use crate::table::Table;

pub const PUBLICATION_ID_COLUMN: &str = "id";
pub const PUBLICATION_SUFFIX: &str = "_pub";
pub const PROJECT_SUFFIX: &str = "_proj";

// Inner join: publications without a matching project are dropped. Both keys
// are compared as trimmed text since the sources disagree on representation.
pub fn join_on_project(publications: &Table, projects: &Table) -> Result<Table, ExplorerError> {
    let pub_key = publications.column_index(PROJECT_ID_COLUMN).ok_or_else(|| {
        ExplorerError::MergeImpossible(format!(
            "publications table has no '{PROJECT_ID_COLUMN}' column"
        ))
    })?;
    let proj_key = projects.column_index(PROJECT_ID_COLUMN).ok_or_else(|| {
        ExplorerError::MergeImpossible(format!(
            "projects table has no '{PROJECT_ID_COLUMN}' column"
        ))
    })?;

    let merged = merge(publications, pub_key, projects, proj_key);
    Ok(consolidate_organizations(merged))
}

fn merge(publications: &Table, pub_key: usize, projects: &Table, proj_key: usize) -> Table {
    let pub_names: HashSet<&str> = publications.columns().iter().map(String::as_str).collect();
    let proj_names: HashSet<&str> = projects.columns().iter().map(String::as_str).collect();

    // Publication columns first, project columns after, join key kept once;
    // names present on both sides are suffix-qualified.
    let mut columns = Vec::with_capacity(publications.columns().len() + projects.columns().len());
    for (index, name) in publications.columns().iter().enumerate() {
        if index != pub_key && proj_names.contains(name.as_str()) {
            columns.push(format!("{name}{PUBLICATION_SUFFIX}"));
        } else {
            columns.push(name.clone());
        }
    }
    for (index, name) in projects.columns().iter().enumerate() {
        if index == proj_key {
            continue;
        }
        if pub_names.contains(name.as_str()) {
            columns.push(format!("{name}{PROJECT_SUFFIX}"));
        } else {
            columns.push(name.clone());
        }
    }

    let mut by_key: HashMap<&str, Vec<usize>> = HashMap::new();
    for (index, row) in projects.rows().iter().enumerate() {
        by_key.entry(row[proj_key].trim()).or_default().push(index);
    }

    let mut merged = Table::new(columns);
    for row in publications.rows() {
        let Some(matches) = by_key.get(row[pub_key].trim()) else {
            continue;
        };
        for &project_row in matches {
            let mut cells = Vec::with_capacity(merged.columns().len());
            for (index, cell) in row.iter().enumerate() {
                if index == pub_key {
                    cells.push(cell.trim().to_string());
                } else {
                    cells.push(cell.clone());
                }
            }
            for (index, cell) in projects.rows()[project_row].iter().enumerate() {
                if index != proj_key {
                    cells.push(cell.clone());
                }
            }
            merged.push_row(cells);
        }
    }
    merged
}

// A publication listed under several projects matches once per project; keep
// the first-seen row per publication id and union the organization names of
// every match into it. Without a publication id column the raw join result
// stands.
fn consolidate_organizations(merged: Table) -> Table {
    let id_index = merged
        .column_index(PUBLICATION_ID_COLUMN)
        .or_else(|| merged.column_index(&format!("{PUBLICATION_ID_COLUMN}{PUBLICATION_SUFFIX}")));
    let (Some(id_index), Some(orgs_index)) = (id_index, merged.column_index(ORGANIZATIONS_COLUMN))
    else {
        return merged;
    };

    let mut unions: HashMap<String, BTreeSet<String>> = HashMap::new();
    for row in merged.rows() {
        let entry = unions.entry(row[id_index].clone()).or_default();
        for name in row[orgs_index].split(';') {
            let name = name.trim();
            if !name.is_empty() {
                entry.insert(name.to_string());
            }
        }
    }

    let mut deduped = Table::new(merged.columns().to_vec());
    let mut seen = HashSet::new();
    for row in merged.rows() {
        let id = row[id_index].clone();
        if !seen.insert(id.clone()) {
            continue;
        }
        let mut cells = row.clone();
        cells[orgs_index] = unions[&id]
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(ORGANIZATION_SEPARATOR);
        deduped.push_row(cells);
    }
    deduped
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn projects(rows: &[(&str, &str, &str)]) -> Table {
        let mut table = Table::new(vec![
            "projectID".to_string(),
            "projectAcronym".to_string(),
            "Organizations".to_string(),
        ]);
        for (id, acronym, orgs) in rows {
            table.push_row(vec![
                id.to_string(),
                acronym.to_string(),
                orgs.to_string(),
            ]);
        }
        table
    }

    fn publications(rows: &[(&str, &str, &str)]) -> Table {
        let mut table = Table::new(vec![
            "id".to_string(),
            "projectID".to_string(),
            "title".to_string(),
        ]);
        for (id, project_id, title) in rows {
            table.push_row(vec![
                id.to_string(),
                project_id.to_string(),
                title.to_string(),
            ]);
        }
        table
    }

    #[test]
    fn unmatched_publications_are_dropped() {
        let pubs = publications(&[("p1", "101", "Kept"), ("p2", "999", "Dropped")]);
        let projs = projects(&[("101", "ACR1", "Org A")]);
        let combined = join_on_project(&pubs, &projs).unwrap();
        assert_eq!(combined.row_count(), 1);
        assert_eq!(combined.value(0, "title"), Some("Kept"));
    }

    #[test]
    fn keys_match_after_trimming() {
        let pubs = publications(&[("p1", " 101 ", "Padded key")]);
        let projs = projects(&[("101", "ACR1", "Org A")]);
        let combined = join_on_project(&pubs, &projs).unwrap();
        assert_eq!(combined.row_count(), 1);
        assert_eq!(combined.value(0, "projectID"), Some("101"));
    }

    #[test]
    fn one_row_per_publication_with_union_of_organizations() {
        let pubs = publications(&[
            ("p1", "101", "Shared paper"),
            ("p1", "202", "Shared paper"),
            ("p2", "202", "Other paper"),
        ]);
        let projs = projects(&[("101", "ACR1", "Org B"), ("202", "ACR2", "Org A")]);
        let combined = join_on_project(&pubs, &projs).unwrap();
        assert_eq!(combined.row_count(), 2);
        assert_eq!(combined.value(0, "id"), Some("p1"));
        assert_eq!(combined.value(0, "Organizations"), Some("Org A; Org B"));
        // first-seen row wins: p1 keeps the ACR1 match
        assert_eq!(combined.value(0, "projectAcronym"), Some("ACR1"));
        assert_eq!(combined.value(1, "Organizations"), Some("Org A"));
    }

    #[test]
    fn colliding_columns_are_suffix_qualified() {
        let mut pubs = Table::new(vec![
            "id".to_string(),
            "projectID".to_string(),
            "projectAcronym".to_string(),
        ]);
        pubs.push_row(vec![
            "p1".to_string(),
            "101".to_string(),
            "FROM-PUB".to_string(),
        ]);
        let projs = projects(&[("101", "FROM-PROJ", "Org A")]);

        let combined = join_on_project(&pubs, &projs).unwrap();
        assert!(combined.has_column("projectAcronym_pub"));
        assert!(combined.has_column("projectAcronym_proj"));
        assert!(!combined.has_column("projectAcronym"));
        assert_eq!(
            combined.columns().iter().filter(|c| *c == "projectID").count(),
            1
        );
        assert_eq!(combined.value(0, "projectAcronym_proj"), Some("FROM-PROJ"));
    }

    #[test]
    fn missing_key_column_is_merge_impossible() {
        let mut pubs = Table::new(vec!["id".to_string(), "title".to_string()]);
        pubs.push_row(vec!["p1".to_string(), "No key".to_string()]);
        let projs = projects(&[("101", "ACR1", "Org A")]);
        let err = join_on_project(&pubs, &projs).unwrap_err();
        assert_matches!(err, ExplorerError::MergeImpossible(_));

        let pubs = publications(&[("p1", "101", "Fine")]);
        let mut projs = Table::new(vec!["projectAcronym".to_string()]);
        projs.push_row(vec!["ACR1".to_string()]);
        let err = join_on_project(&pubs, &projs).unwrap_err();
        assert_matches!(err, ExplorerError::MergeImpossible(_));
    }

    #[test]
    fn missing_publication_id_skips_dedup() {
        let mut pubs = Table::new(vec!["projectID".to_string(), "title".to_string()]);
        pubs.push_row(vec!["101".to_string(), "A".to_string()]);
        pubs.push_row(vec!["101".to_string(), "A".to_string()]);
        let projs = projects(&[("101", "ACR1", "Org A")]);
        let combined = join_on_project(&pubs, &projs).unwrap();
        assert_eq!(combined.row_count(), 2);
    }
}
