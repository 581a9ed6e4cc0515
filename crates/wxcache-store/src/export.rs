//! CSV export of query results.

use std::io::Write;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use wxcache_types::SampleSet;

use crate::error::{Error, Result};

/// Write a sample set as CSV.
///
/// The first column is the UTC timestamp in RFC 3339 form, followed by one
/// column per requested measurement in storage order. Missing values are
/// written as empty fields.
pub fn write_csv<W: Write>(set: &SampleSet, writer: W) -> Result<usize> {
    let mut csv = csv::Writer::from_writer(writer);
    let columns: Vec<_> = set.columns().iter().collect();

    let mut header = vec!["timestamp".to_string()];
    header.extend(columns.iter().map(|c| c.name().to_string()));
    csv.write_record(&header)?;

    for (i, &timestamp) in set.timestamps().iter().enumerate() {
        let time = OffsetDateTime::from_unix_timestamp(timestamp)
            .ok()
            .and_then(|t| t.format(&Rfc3339).ok())
            .ok_or_else(|| Error::InvalidQuery(format!("timestamp out of range: {timestamp}")))?;

        let mut record = Vec::with_capacity(columns.len() + 1);
        record.push(time);
        for column in &columns {
            let value = set
                .column(*column)
                .and_then(|values| values.get(i).copied().flatten());
            record.push(value.map(|v| v.to_string()).unwrap_or_default());
        }
        csv.write_record(&record)?;
    }

    csv.flush()?;
    Ok(set.len())
}
