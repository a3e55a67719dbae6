//! Occurrence/media join and completeness filter

use biocluster_common::{
    AnalysisError, FeatureSchema, JoinedRecord, MediaLink, OccurrenceRecord, RecordId, Result,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Joined records plus bookkeeping about what was filtered
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// Complete records in their original order
    pub records: Vec<JoinedRecord>,
    /// Records dropped for a missing or non-finite required feature
    pub dropped: usize,
    /// Surviving records that received a media reference
    pub linked: usize,
}

/// Attach the first media reference per identifier and drop incomplete records
///
/// # Errors
/// - `InvalidInput` when an identifier is blank on either side, or when no
///   complete record survives the filter
pub fn join_records<L>(
    records: Vec<OccurrenceRecord>,
    links: L,
    schema: &FeatureSchema,
) -> Result<JoinOutcome>
where
    L: IntoIterator<Item = MediaLink>,
{
    let index = index_links(links)?;
    debug!("Indexed media links for {} identifiers", index.len());

    let total = records.len();
    let mut joined = Vec::with_capacity(total);
    let mut dropped = 0;
    let mut linked = 0;

    for record in records {
        if record.id.trim().is_empty() {
            return Err(AnalysisError::InvalidInput(
                "Occurrence record has a blank identifier".to_string(),
            ));
        }

        if record.features(schema).is_none() {
            dropped += 1;
            continue;
        }

        let media = index.get(record.id.as_str()).cloned();
        if media.is_some() {
            linked += 1;
        }
        joined.push(JoinedRecord { record, media });
    }

    if dropped > 0 {
        warn!(
            "Dropped {} of {} records with missing required features ({})",
            dropped,
            total,
            schema.names().join(", ")
        );
    }

    if joined.is_empty() {
        return Err(AnalysisError::InvalidInput(format!(
            "Empty dataset: none of {total} records has every required feature"
        )));
    }

    info!(
        "Joined {} records ({} with media, {} dropped)",
        joined.len(),
        linked,
        dropped
    );

    Ok(JoinOutcome {
        records: joined,
        dropped,
        linked,
    })
}

/// First reference per identifier wins; blank references are skipped
fn index_links<L>(links: L) -> Result<HashMap<RecordId, String>>
where
    L: IntoIterator<Item = MediaLink>,
{
    let mut index = HashMap::new();
    for link in links {
        if link.id.trim().is_empty() {
            return Err(AnalysisError::InvalidInput(
                "Media link has a blank identifier".to_string(),
            ));
        }
        if link.reference.trim().is_empty() {
            continue;
        }
        index.entry(link.id).or_insert(link.reference);
    }
    Ok(index)
}
