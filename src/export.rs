use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::ExplorerError;
use crate::table::Table;

pub const EXPORT_FILENAME: &str = "cordis_filtered_results.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportDelimiter {
    Comma,
    Semicolon,
}

impl ExportDelimiter {
    fn byte(self) -> u8 {
        match self {
            ExportDelimiter::Comma => b',',
            ExportDelimiter::Semicolon => b';',
        }
    }
}

pub fn default_destination() -> Utf8PathBuf {
    Utf8PathBuf::from(EXPORT_FILENAME)
}

// Writes the header plus every selected row; the display preview cap does not
// apply here. Zero selected rows still produce a valid header-only file.
pub fn write_rows(
    table: &Table,
    rows: &[usize],
    delimiter: ExportDelimiter,
    destination: &Utf8Path,
) -> Result<(), ExplorerError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter.byte())
        .from_writer(Vec::new());

    writer
        .write_record(table.columns())
        .map_err(|err| ExplorerError::ExportIo(err.to_string()))?;
    for &index in rows {
        writer
            .write_record(&table.rows()[index])
            .map_err(|err| ExplorerError::ExportIo(err.to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| ExplorerError::ExportIo(err.to_string()))?;
    write_bytes_atomic(destination, &bytes)
}

fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), ExplorerError> {
    if let Some(parent) = path.parent()
        && !parent.as_str().is_empty()
    {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| ExplorerError::Filesystem(err.to_string()))?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(tmp_path.as_std_path(), content)
        .map_err(|err| ExplorerError::Filesystem(err.to_string()))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path())
        .map_err(|err| ExplorerError::Filesystem(err.to_string()))?;
    Ok(())
}
