//! Readers for GBIF tab-delimited occurrence exports
//!
//! `occurrence.txt` supplies the numeric features keyed by `gbifID`;
//! `multimedia.txt` supplies media references (`identifier`) for the same ids.
//! GBIF exports carry unbalanced quotes in free-text columns, so quoting is
//! disabled and rows may be ragged.

use biocluster_common::{FeatureColumn, FeatureSchema, MediaLink, OccurrenceRecord};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Identifier column shared by both exports
pub const ID_COLUMN: &str = "gbifID";
/// Media reference column in the multimedia export
pub const MEDIA_COLUMN: &str = "identifier";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to open {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed tab-delimited data: {0}")]
    Csv(#[from] csv::Error),

    #[error("Missing column `{column}` in {source_name}")]
    MissingColumn { column: String, source_name: String },
}

pub type Result<T> = std::result::Result<T, IngestError>;

/// Read `occurrence.txt`, keeping the schema's columns
///
/// Empty cells and values that do not parse as numbers become missing
/// features; the join stage decides what to drop.
pub fn read_occurrences(
    path: impl AsRef<Path>,
    schema: &FeatureSchema,
) -> Result<Vec<OccurrenceRecord>> {
    let path = path.as_ref();
    let records = parse_occurrences(open(path)?, schema, &path.display().to_string())?;
    info!("Read {} occurrence records from {}", records.len(), path.display());
    Ok(records)
}

/// Read `multimedia.txt` as `(gbifID, identifier)` pairs in file order
pub fn read_media_links(path: impl AsRef<Path>) -> Result<Vec<MediaLink>> {
    let path = path.as_ref();
    let links = parse_media_links(open(path)?, &path.display().to_string())?;
    info!("Read {} media links from {}", links.len(), path.display());
    Ok(links)
}

/// Parse occurrences from any reader; `source_name` labels errors
pub fn parse_occurrences<R: Read>(
    input: R,
    schema: &FeatureSchema,
    source_name: &str,
) -> Result<Vec<OccurrenceRecord>> {
    let mut reader = tab_reader(input);
    let headers = reader.headers()?.clone();

    let id_idx = column_index(&headers, ID_COLUMN, source_name)?;
    let feature_idx: Vec<(FeatureColumn, usize)> = schema
        .columns()
        .iter()
        .map(|&column| column_index(&headers, column.name(), source_name).map(|idx| (column, idx)))
        .collect::<Result<_>>()?;

    let mut records = Vec::new();
    let mut unparsable = 0usize;
    for row in reader.records() {
        let row = row?;
        let mut record = OccurrenceRecord::new(cell(&row, id_idx).unwrap_or_default());
        for &(column, idx) in &feature_idx {
            let value = cell(&row, idx).and_then(|raw| match raw.parse::<f64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    unparsable += 1;
                    None
                }
            });
            record.set(column, value);
        }
        records.push(record);
    }

    if unparsable > 0 {
        debug!("{} non-numeric feature cells in {} treated as missing", unparsable, source_name);
    }
    Ok(records)
}

/// Parse media links from any reader; `source_name` labels errors
pub fn parse_media_links<R: Read>(input: R, source_name: &str) -> Result<Vec<MediaLink>> {
    let mut reader = tab_reader(input);
    let headers = reader.headers()?.clone();
    let id_idx = column_index(&headers, ID_COLUMN, source_name)?;
    let media_idx = column_index(&headers, MEDIA_COLUMN, source_name)?;

    let mut links = Vec::new();
    for row in reader.records() {
        let row = row?;
        links.push(MediaLink::new(
            cell(&row, id_idx).unwrap_or_default(),
            cell(&row, media_idx).unwrap_or_default(),
        ));
    }
    Ok(links)
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn tab_reader<R: Read>(input: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .flexible(true)
        .has_headers(true)
        .from_reader(input)
}

fn column_index(headers: &csv::StringRecord, column: &str, source_name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim() == column)
        .ok_or_else(|| IngestError::MissingColumn {
            column: column.to_string(),
            source_name: source_name.to_string(),
        })
}

/// Trimmed, non-empty cell text; short rows read as empty
fn cell(row: &csv::StringRecord, idx: usize) -> Option<&str> {
    row.get(idx).map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const OCCURRENCES: &str = "gbifID\tdecimalLatitude\tdecimalLongitude\tremarks\n\
        101\t-23.5\t-46.6\t\"quoted\n\
        102\t\t-46.7\tnone\n\
        103\tabc\t-46.8\n";

    fn lat_lon() -> FeatureSchema {
        FeatureSchema::new(vec![
            FeatureColumn::DecimalLatitude,
            FeatureColumn::DecimalLongitude,
        ])
        .unwrap()
    }

    #[test]
    fn test_parse_occurrences() {
        let records = parse_occurrences(OCCURRENCES.as_bytes(), &lat_lon(), "memory").unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].id, "101");
        assert_eq!(records[0].get(FeatureColumn::DecimalLatitude), Some(-23.5));
        assert_eq!(records[1].get(FeatureColumn::DecimalLatitude), None);
        assert_eq!(records[2].get(FeatureColumn::DecimalLatitude), None);
        assert_eq!(records[2].get(FeatureColumn::DecimalLongitude), Some(-46.8));
    }

    #[test]
    fn test_missing_feature_column() {
        let err = parse_occurrences(OCCURRENCES.as_bytes(), &FeatureSchema::default(), "memory")
            .unwrap_err();
        match err {
            IngestError::MissingColumn { column, .. } => assert_eq!(column, "individualCount"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_media_links() {
        let input = "gbifID\ttype\tidentifier\n101\tStillImage\thttps://img/1.jpg\n101\tStillImage\thttps://img/2.jpg\n102\tSound\n";
        let links = parse_media_links(input.as_bytes(), "memory").unwrap();
        assert_eq!(links.len(), 3);
        assert_eq!(links[0], MediaLink::new("101", "https://img/1.jpg"));
        assert_eq!(links[2].reference, "");
    }

    #[test]
    fn test_media_requires_identifier() {
        let err = parse_media_links("gbifID\ttype\n1\tSound\n".as_bytes(), "memory").unwrap_err();
        assert!(matches!(
            err,
            IngestError::MissingColumn { ref column, .. } if column == MEDIA_COLUMN
        ));
    }
}
