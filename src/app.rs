use std::time::Instant;

use camino::Utf8Path;
use chrono::Utc;
use serde::Serialize;

use crate::aggregate::{Aggregation, aggregate_projects};
use crate::error::ExplorerError;
use crate::export::{self, ExportDelimiter};
use crate::fetch::{ArchiveClient, extract_first_csv};
use crate::filter::{FilterSelection, PREVIEW_ROWS, matching_rows};
use crate::join::join_on_project;
use crate::session::Session;
use crate::table::Table;

pub const PROJECTS_ZIP_URL: &str = "https://cordis.europa.eu/data/cordis-HORIZONprojects-csv.zip";
pub const PUBLICATIONS_ZIP_URL: &str =
    "https://cordis.europa.eu/data/cordis-HORIZONprojectPublications-csv.zip";

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub url: String,
    pub action: String,
    pub rows: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadResult {
    pub sources: Vec<SourceReport>,
    pub combined_rows: Option<usize>,
    pub aggregation_note: Option<String>,
    pub merge_note: Option<String>,
    pub fetched_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterResult {
    pub matched: usize,
    pub columns: Vec<String>,
    pub preview: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub path: String,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetResult {
    pub selection: FilterSelection,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn emit(sink: &dyn ProgressSink, message: impl Into<String>) {
    sink.event(ProgressEvent {
        message: message.into(),
    });
}

#[derive(Clone)]
pub struct App<C: ArchiveClient> {
    client: C,
}

impl<C: ArchiveClient> App<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    // Downloads (or reuses) both sources, aggregates projects and joins the
    // publications onto them. Failed downloads abort the load; a skipped
    // aggregation or an impossible merge is reported in the result instead,
    // with the raw tables kept on the session.
    pub fn load(
        &self,
        session: &mut Session,
        options: LoadOptions,
        sink: &dyn ProgressSink,
    ) -> Result<LoadResult, ExplorerError> {
        if options.force || session.force_refresh {
            emit(sink, "phase=Fetch; discarding cached downloads");
            session.cache.invalidate();
            session.force_refresh = false;
        }

        let (projects_raw, projects_report) =
            self.fetch_table(session, PROJECTS_ZIP_URL, sink)?;
        let (publications, publications_report) =
            self.fetch_table(session, PUBLICATIONS_ZIP_URL, sink)?;

        let projects_raw = projects_raw.unwrap_or_default();
        let publications = publications.unwrap_or_default();

        emit(sink, "phase=Aggregate; collapsing project rows");
        let (aggregated, aggregation_note) = match aggregate_projects(&projects_raw) {
            Aggregation::Aggregated(table) => (table, None),
            Aggregation::Skipped { reason } => {
                tracing::warn!(%reason, "aggregation skipped");
                (projects_raw.clone(), Some(reason))
            }
        };

        emit(sink, "phase=Join; merging publications with projects");
        let (combined, merge_note) = match join_on_project(&publications, &aggregated) {
            Ok(table) => (Some(table), None),
            Err(ExplorerError::MergeImpossible(reason)) => {
                tracing::warn!(%reason, "merge impossible");
                (None, Some(reason))
            }
            Err(other) => return Err(other),
        };

        let fetched_at = Utc::now();
        let result = LoadResult {
            sources: vec![projects_report, publications_report],
            combined_rows: combined.as_ref().map(Table::row_count),
            aggregation_note: aggregation_note.clone(),
            merge_note: merge_note.clone(),
            fetched_at: fetched_at.to_rfc3339(),
        };

        session.projects = Some(projects_raw);
        session.publications = Some(publications);
        session.aggregated = Some(aggregated);
        session.combined = combined;
        session.aggregation_note = aggregation_note;
        session.merge_note = merge_note;
        session.last_fetch = Some(fetched_at);

        Ok(result)
    }

    fn fetch_table(
        &self,
        session: &mut Session,
        url: &str,
        sink: &dyn ProgressSink,
    ) -> Result<(Option<Table>, SourceReport), ExplorerError> {
        if let Some(cached) = session.cache.get(url) {
            emit(sink, format!("phase=Fetch; reusing cached download for {url}"));
            return Ok((
                cached.clone(),
                SourceReport {
                    url: url.to_string(),
                    action: "cache".to_string(),
                    rows: cached.as_ref().map(Table::row_count),
                },
            ));
        }

        emit(sink, format!("phase=Fetch; downloading {url}"));
        let start = Instant::now();
        let archive = self.client.download(url)?;
        emit(
            sink,
            format!("fetch.response latency_ms={}", start.elapsed().as_millis()),
        );

        emit(sink, "phase=Extract; reading archive");
        let table = extract_first_csv(&archive)?;
        if table.is_none() {
            emit(sink, format!("phase=Extract; no tabular entry in {url}"));
        }
        session.cache.insert(url.to_string(), table.clone());

        let rows = table.as_ref().map(Table::row_count);
        Ok((
            table,
            SourceReport {
                url: url.to_string(),
                action: "download".to_string(),
                rows,
            },
        ))
    }

    pub fn filter_view(
        &self,
        session: &Session,
        selection: &FilterSelection,
    ) -> Result<FilterResult, ExplorerError> {
        let table = session.combined()?;
        let rows = matching_rows(table, selection);
        let preview = rows
            .iter()
            .take(PREVIEW_ROWS)
            .map(|&index| table.rows()[index].clone())
            .collect();
        Ok(FilterResult {
            matched: rows.len(),
            columns: table.columns().to_vec(),
            preview,
        })
    }

    pub fn export(
        &self,
        session: &Session,
        selection: &FilterSelection,
        destination: &Utf8Path,
        delimiter: ExportDelimiter,
        sink: &dyn ProgressSink,
    ) -> Result<ExportResult, ExplorerError> {
        let table = session.combined()?;
        let rows = matching_rows(table, selection);
        emit(
            sink,
            format!("phase=Export; writing {} rows to {destination}", rows.len()),
        );
        export::write_rows(table, &rows, delimiter, destination)?;
        Ok(ExportResult {
            path: destination.to_string(),
            rows: rows.len(),
        })
    }

    pub fn reset(&self, session: &mut Session) -> ResetResult {
        session.reset_filters();
        ResetResult {
            selection: session.selection.clone(),
        }
    }
}
