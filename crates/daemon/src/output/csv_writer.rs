use std::path::Path;

use anyhow::{anyhow, Error};
use aqhi_core::ensure_parent_dir;
use csv::WriterBuilder;

use crate::StationRecord;

/// Writes one row per record. The header comes from `T::COLUMNS` so it is
/// present even when there are no records; absent values are empty fields.
pub fn write_csv<T: StationRecord>(records: &[T], path: &Path) -> Result<usize, Error> {
    ensure_parent_dir(path)?;
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|e| anyhow!("failed to create {}: {}", path.display(), e))?;

    writer.write_record(T::COLUMNS)?;
    for record in records {
        writer
            .serialize(record.row())
            .map_err(|e| anyhow!("failed to write row to {}: {}", path.display(), e))?;
    }
    writer.flush()?;
    Ok(records.len())
}
