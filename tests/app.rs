use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use zip::write::SimpleFileOptions;

use cordis_explorer::app::{App, LoadOptions, PROJECTS_ZIP_URL, PUBLICATIONS_ZIP_URL};
use cordis_explorer::error::ExplorerError;
use cordis_explorer::export::ExportDelimiter;
use cordis_explorer::fetch::ArchiveClient;
use cordis_explorer::filter::FilterSelection;
use cordis_explorer::output::JsonOutput;
use cordis_explorer::session::Session;

fn zip_archive(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[derive(Default)]
struct MockState {
    archives: HashMap<String, Vec<u8>>,
    calls: Mutex<HashMap<String, usize>>,
}

#[derive(Clone, Default)]
struct MockArchiveClient {
    state: Arc<MockState>,
}

impl MockArchiveClient {
    fn with_archives(archives: &[(&str, Vec<u8>)]) -> Self {
        Self {
            state: Arc::new(MockState {
                archives: archives
                    .iter()
                    .map(|(url, bytes)| (url.to_string(), bytes.clone()))
                    .collect(),
                calls: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn calls_for(&self, url: &str) -> usize {
        *self.state.calls.lock().unwrap().get(url).unwrap_or(&0)
    }
}

impl ArchiveClient for MockArchiveClient {
    fn download(&self, url: &str) -> Result<Vec<u8>, ExplorerError> {
        *self
            .state
            .calls
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_insert(0) += 1;
        self.state
            .archives
            .get(url)
            .cloned()
            .ok_or_else(|| ExplorerError::FetchHttp(format!("{url}: connection refused")))
    }
}

fn default_fixtures() -> MockArchiveClient {
    let projects = zip_archive(&[(
        "project.csv",
        "projectID;projectAcronym;name\n\
         101;ACR1;Org B\n\
         101;ACR1;Org A\n\
         202;ACR2;Solo Org\n",
    )]);
    let publications = zip_archive(&[(
        "projectPublications.csv",
        "id;projectID;title\n\
         p1;101;Shared results\n\
         p2;202;Solo results\n\
         p3;999;Orphan paper\n",
    )]);
    MockArchiveClient::with_archives(&[
        (PROJECTS_ZIP_URL, projects),
        (PUBLICATIONS_ZIP_URL, publications),
    ])
}

#[test]
fn load_aggregates_joins_and_drops_orphans() {
    let client = default_fixtures();
    let app = App::new(client);
    let mut session = Session::default();

    let result = app
        .load(&mut session, LoadOptions::default(), &JsonOutput)
        .unwrap();

    assert_eq!(result.combined_rows, Some(2));
    assert_eq!(result.aggregation_note, None);
    assert_eq!(result.merge_note, None);
    assert!(session.data_loaded());
    assert!(session.last_fetch.is_some());

    let combined = session.combined.as_ref().unwrap();
    assert_eq!(combined.value(0, "id"), Some("p1"));
    assert_eq!(combined.value(0, "Organizations"), Some("Org A; Org B"));
    assert_eq!(combined.value(1, "Organizations"), Some("Solo Org"));

    let view = app
        .filter_view(&session, &FilterSelection::default())
        .unwrap();
    assert_eq!(view.matched, 2);
    assert_eq!(view.preview.len(), 2);
}

#[test]
fn second_load_reuses_cached_downloads() {
    let client = default_fixtures();
    let app = App::new(client.clone());
    let mut session = Session::default();

    app.load(&mut session, LoadOptions::default(), &JsonOutput)
        .unwrap();
    let second = app
        .load(&mut session, LoadOptions::default(), &JsonOutput)
        .unwrap();

    assert_eq!(client.calls_for(PROJECTS_ZIP_URL), 1);
    assert_eq!(client.calls_for(PUBLICATIONS_ZIP_URL), 1);
    assert!(second.sources.iter().all(|source| source.action == "cache"));
}

#[test]
fn force_refresh_invalidates_the_cache() {
    let client = default_fixtures();
    let app = App::new(client.clone());
    let mut session = Session::default();

    app.load(&mut session, LoadOptions::default(), &JsonOutput)
        .unwrap();
    session.force_refresh = true;
    let second = app
        .load(&mut session, LoadOptions::default(), &JsonOutput)
        .unwrap();

    assert_eq!(client.calls_for(PROJECTS_ZIP_URL), 2);
    assert!(!session.force_refresh);
    assert!(
        second
            .sources
            .iter()
            .all(|source| source.action == "download")
    );
}

#[test]
fn merge_impossible_is_a_note_not_a_crash() {
    let projects = zip_archive(&[(
        "project.csv",
        "projectID;projectAcronym;name\n101;ACR1;Org A\n",
    )]);
    let publications = zip_archive(&[("pubs.csv", "id;title\np1;No key here\n")]);
    let client = MockArchiveClient::with_archives(&[
        (PROJECTS_ZIP_URL, projects),
        (PUBLICATIONS_ZIP_URL, publications),
    ]);
    let app = App::new(client);
    let mut session = Session::default();

    let result = app
        .load(&mut session, LoadOptions::default(), &JsonOutput)
        .unwrap();

    assert_eq!(result.combined_rows, None);
    assert!(result.merge_note.is_some());
    assert!(session.publications.is_some());
    assert!(session.combined.is_none());

    let err = app
        .filter_view(&session, &FilterSelection::default())
        .unwrap_err();
    assert_matches!(err, ExplorerError::NothingLoaded);
}

#[test]
fn archive_without_tabular_entry_loads_as_empty_data() {
    let projects = zip_archive(&[("readme.txt", "no tables in here")]);
    let publications = zip_archive(&[("pubs.csv", "id;projectID;title\np1;101;Paper\n")]);
    let client = MockArchiveClient::with_archives(&[
        (PROJECTS_ZIP_URL, projects),
        (PUBLICATIONS_ZIP_URL, publications),
    ]);
    let app = App::new(client);
    let mut session = Session::default();

    let result = app
        .load(&mut session, LoadOptions::default(), &JsonOutput)
        .unwrap();

    assert_eq!(result.sources[0].rows, None);
    assert!(result.aggregation_note.is_some());
    assert!(result.merge_note.is_some());
    assert_eq!(result.combined_rows, None);
}

#[test]
fn network_failure_leaves_the_session_untouched() {
    let client = MockArchiveClient::default();
    let app = App::new(client);
    let mut session = Session::default();

    let err = app
        .load(&mut session, LoadOptions::default(), &JsonOutput)
        .unwrap_err();

    assert_matches!(err, ExplorerError::FetchHttp(_));
    assert!(!session.data_loaded());
    assert!(session.last_fetch.is_none());
}

#[test]
fn export_writes_the_full_set_beyond_the_preview_cap() {
    let mut publication_rows = String::from("id;projectID;title\n");
    for index in 0..600 {
        publication_rows.push_str(&format!("p{index};101;Paper {index}\n"));
    }
    let projects = zip_archive(&[(
        "project.csv",
        "projectID;projectAcronym;name\n101;ACR1;Org A\n",
    )]);
    let publications = zip_archive(&[("pubs.csv", publication_rows.as_str())]);
    let client = MockArchiveClient::with_archives(&[
        (PROJECTS_ZIP_URL, projects),
        (PUBLICATIONS_ZIP_URL, publications),
    ]);
    let app = App::new(client);
    let mut session = Session::default();

    app.load(&mut session, LoadOptions::default(), &JsonOutput)
        .unwrap();

    let view = app
        .filter_view(&session, &FilterSelection::default())
        .unwrap();
    assert_eq!(view.matched, 600);
    assert_eq!(view.preview.len(), 500);

    let dir = tempfile::tempdir().unwrap();
    let destination =
        Utf8PathBuf::from_path_buf(dir.path().join("cordis_filtered_results.csv")).unwrap();
    let result = app
        .export(
            &session,
            &FilterSelection::default(),
            &destination,
            ExportDelimiter::Comma,
            &JsonOutput,
        )
        .unwrap();

    assert_eq!(result.rows, 600);
    let content = std::fs::read_to_string(destination.as_std_path()).unwrap();
    assert_eq!(content.lines().count(), 601);
}
