//! Client-side record search.

use crate::record::Record;

/// Keep records whose title or readable content contains `query`,
/// ignoring case. A blank query keeps everything.
///
/// Locked and unreadable records can only match on their title.
pub fn search<'a>(records: &'a [Record], query: &str) -> Vec<&'a Record> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return records.iter().collect();
    }

    records
        .iter()
        .filter(|record| {
            record.metadata.title.to_lowercase().contains(&needle)
                || record
                    .content
                    .text()
                    .is_some_and(|text| text.to_lowercase().contains(&needle))
        })
        .collect()
}
