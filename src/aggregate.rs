use std::collections::{BTreeSet, HashMap, HashSet};

use crate::table::Table;

pub const PROJECT_ID_COLUMN: &str = "projectID";
pub const ORGANIZATION_COLUMN: &str = "name";
pub const ORGANIZATIONS_COLUMN: &str = "Organizations";
pub const ORGANIZATION_SEPARATOR: &str = "; ";

#[derive(Debug, Clone)]
pub enum Aggregation {
    Aggregated(Table),
    Skipped { reason: String },
}

// One output row per distinct projectID, in first-occurrence order. The
// Organizations column carries the union of organization names seen across
// all rows sharing the identifier, sorted and deduplicated.
pub fn aggregate_projects(raw: &Table) -> Aggregation {
    let Some(id_index) = raw.column_index(PROJECT_ID_COLUMN) else {
        return Aggregation::Skipped {
            reason: format!("projects table has no '{PROJECT_ID_COLUMN}' column"),
        };
    };
    let Some(name_index) = raw.column_index(ORGANIZATION_COLUMN) else {
        return Aggregation::Skipped {
            reason: format!("projects table has no '{ORGANIZATION_COLUMN}' column"),
        };
    };

    // Re-aggregating an already aggregated table must be a no-op, so the
    // union is sourced from the consolidated column when it exists.
    let orgs_index = raw.column_index(ORGANIZATIONS_COLUMN);
    let source_index = orgs_index.unwrap_or(name_index);

    let mut unions: HashMap<String, BTreeSet<String>> = HashMap::new();
    for row in raw.rows() {
        let id = row[id_index].trim().to_string();
        let entry = unions.entry(id).or_default();
        for name in row[source_index].split(';') {
            let name = name.trim();
            if !name.is_empty() {
                entry.insert(name.to_string());
            }
        }
    }

    let mut columns = raw.columns().to_vec();
    if orgs_index.is_none() {
        columns.push(ORGANIZATIONS_COLUMN.to_string());
    }

    let mut aggregated = Table::new(columns);
    let mut seen = HashSet::new();
    for row in raw.rows() {
        let id = row[id_index].trim().to_string();
        if !seen.insert(id.clone()) {
            continue;
        }
        let joined = unions
            .get(&id)
            .map(|names| {
                names
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(ORGANIZATION_SEPARATOR)
            })
            .unwrap_or_default();
        let mut cells = row.clone();
        match orgs_index {
            Some(index) => cells[index] = joined,
            None => cells.push(joined),
        }
        aggregated.push_row(cells);
    }

    Aggregation::Aggregated(aggregated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_projects(rows: &[(&str, &str, &str)]) -> Table {
        let mut table = Table::new(vec![
            "projectID".to_string(),
            "projectAcronym".to_string(),
            "name".to_string(),
        ]);
        for (id, acronym, name) in rows {
            table.push_row(vec![
                id.to_string(),
                acronym.to_string(),
                name.to_string(),
            ]);
        }
        table
    }

    fn expect_table(aggregation: Aggregation) -> Table {
        match aggregation {
            Aggregation::Aggregated(table) => table,
            Aggregation::Skipped { reason } => panic!("aggregation skipped: {reason}"),
        }
    }

    #[test]
    fn organizations_are_sorted_and_deduplicated() {
        let raw = raw_projects(&[
            ("101", "ACR1", "Org B"),
            ("101", "ACR1", "Org A"),
            ("101", "ACR1", "Org B"),
        ]);
        let table = expect_table(aggregate_projects(&raw));
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.value(0, "Organizations"), Some("Org A; Org B"));
    }

    #[test]
    fn union_is_input_order_independent() {
        let forward = raw_projects(&[("101", "ACR1", "Org A"), ("101", "ACR1", "Org B")]);
        let backward = raw_projects(&[("101", "ACR1", "Org B"), ("101", "ACR1", "Org A")]);
        let left = expect_table(aggregate_projects(&forward));
        let right = expect_table(aggregate_projects(&backward));
        assert_eq!(
            left.value(0, "Organizations"),
            right.value(0, "Organizations")
        );
    }

    #[test]
    fn first_occurrence_order_and_fields_survive() {
        let raw = raw_projects(&[
            ("202", "ACR2", "Late Org"),
            ("101", "ACR1", "Org A"),
            ("202", "ACR2", "Early Org"),
        ]);
        let table = expect_table(aggregate_projects(&raw));
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.value(0, "projectID"), Some("202"));
        assert_eq!(table.value(0, "projectAcronym"), Some("ACR2"));
        assert_eq!(table.value(1, "projectID"), Some("101"));
        assert_eq!(table.value(0, "Organizations"), Some("Early Org; Late Org"));
    }

    #[test]
    fn empty_names_never_enter_the_union() {
        let raw = raw_projects(&[("101", "ACR1", "  "), ("101", "ACR1", "Org A")]);
        let table = expect_table(aggregate_projects(&raw));
        assert_eq!(table.value(0, "Organizations"), Some("Org A"));
    }

    #[test]
    fn aggregation_is_idempotent() {
        let raw = raw_projects(&[("101", "ACR1", "Org B"), ("101", "ACR1", "Org A")]);
        let once = expect_table(aggregate_projects(&raw));
        let twice = expect_table(aggregate_projects(&once));
        assert_eq!(once, twice);
    }

    #[test]
    fn missing_identifier_column_is_reported() {
        let mut table = Table::new(vec!["name".to_string()]);
        table.push_row(vec!["Org A".to_string()]);
        match aggregate_projects(&table) {
            Aggregation::Skipped { reason } => assert!(reason.contains("projectID")),
            Aggregation::Aggregated(_) => panic!("expected skip"),
        }
    }

    #[test]
    fn missing_name_column_is_reported() {
        let mut table = Table::new(vec!["projectID".to_string()]);
        table.push_row(vec!["101".to_string()]);
        match aggregate_projects(&table) {
            Aggregation::Skipped { reason } => assert!(reason.contains("name")),
            Aggregation::Aggregated(_) => panic!("expected skip"),
        }
    }
}
