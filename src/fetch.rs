use std::io::{Cursor, Read};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use zip::ZipArchive;

use crate::error::ExplorerError;
use crate::table::Table;

pub const TABLE_DELIMITER: u8 = b';';
const REQUEST_TIMEOUT_SECS: u64 = 60;

pub trait ArchiveClient: Send + Sync {
    fn download(&self, url: &str) -> Result<Vec<u8>, ExplorerError>;
}

#[derive(Clone)]
pub struct HttpArchiveClient {
    client: Client,
}

impl HttpArchiveClient {
    pub fn new() -> Result<Self, ExplorerError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("cordis-x/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ExplorerError::FetchHttp(err.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|err| ExplorerError::FetchHttp(err.to_string()))?;

        Ok(Self { client })
    }
}

impl ArchiveClient for HttpArchiveClient {
    fn download(&self, url: &str) -> Result<Vec<u8>, ExplorerError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| ExplorerError::FetchHttp(format!("{url}: {err}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "download failed".to_string());
            return Err(ExplorerError::FetchStatus { status, message });
        }

        let bytes = response
            .bytes()
            .map_err(|err| ExplorerError::FetchHttp(format!("{url}: {err}")))?;
        tracing::debug!(url, bytes = bytes.len(), "archive downloaded");
        Ok(bytes.to_vec())
    }
}

// Returns None when the archive holds no tabular entry at all; callers treat
// that as empty data, not as a failure.
pub fn extract_first_csv(archive: &[u8]) -> Result<Option<Table>, ExplorerError> {
    let mut zip = ZipArchive::new(Cursor::new(archive))
        .map_err(|err| ExplorerError::ArchiveRead(err.to_string()))?;

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|err| ExplorerError::ArchiveRead(err.to_string()))?;
        if entry.is_dir() || !entry.name().ends_with(".csv") {
            continue;
        }
        let mut raw = Vec::new();
        entry
            .read_to_end(&mut raw)
            .map_err(|err| ExplorerError::ArchiveRead(err.to_string()))?;
        return parse_delimited(&raw).map(Some);
    }

    Ok(None)
}

pub fn parse_delimited(raw: &[u8]) -> Result<Table, ExplorerError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(TABLE_DELIMITER)
        .from_reader(raw);

    let columns = reader
        .headers()
        .map_err(|err| ExplorerError::ArchiveRead(err.to_string()))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut table = Table::new(columns);
    let mut skipped = 0usize;
    for record in reader.records() {
        // Upstream exports carry the occasional broken row; skip it rather
        // than abort the whole load.
        let Ok(record) = record else {
            skipped += 1;
            continue;
        };
        table.push_row(record.iter().map(str::to_string).collect());
    }
    if skipped > 0 {
        tracing::debug!(skipped, "malformed rows dropped during parse");
    }

    Ok(table)
}
