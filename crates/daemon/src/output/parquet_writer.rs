use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Error};
use aqhi_core::ensure_parent_dir;
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::record::RecordWriter;

use crate::StationRecord;

/// Writes every record as one row group of a parquet file.
pub fn write_parquet<T>(records: &[T], path: &Path) -> Result<usize, Error>
where
    T: StationRecord,
    for<'a> &'a [T::Parquet]: RecordWriter<T::Parquet>,
{
    let rows: Vec<T::Parquet> = records.iter().map(StationRecord::parquet_row).collect();
    let schema = rows
        .as_slice()
        .schema()
        .map_err(|e| anyhow!("failed to build parquet schema: {}", e))?;

    ensure_parent_dir(path)?;
    let file = File::create(path)
        .map_err(|e| anyhow!("failed to create parquet file {}: {}", path.display(), e))?;
    let props = WriterProperties::builder().build();
    let mut writer = SerializedFileWriter::new(file, schema, Arc::new(props))
        .map_err(|e| anyhow!("failed to create parquet writer: {}", e))?;

    let mut row_group = writer
        .next_row_group()
        .map_err(|e| anyhow!("failed to start row group: {}", e))?;
    rows.as_slice()
        .write_to_row_group(&mut row_group)
        .map_err(|e| anyhow!("failed to write rows: {}", e))?;
    row_group
        .close()
        .map_err(|e| anyhow!("failed to close row group: {}", e))?;
    writer
        .close()
        .map_err(|e| anyhow!("failed to close parquet writer: {}", e))?;

    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Observation;
    use parquet::file::reader::{FileReader, SerializedFileReader};

    #[test]
    fn test_writes_readable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("observations.parquet");
        let records = vec![
            Observation {
                id: Some(String::from("AAQHI")),
                name: Some(String::from("Halifax")),
                province: Some(String::from("NS")),
                latitude: 44.65,
                longitude: -63.57,
                aqhi: Some(3.0),
                observed: Some(String::from("2024-01-02T15:00:00Z")),
                source_file: None,
            },
            Observation {
                id: None,
                name: Some(String::from("Moncton")),
                province: None,
                latitude: 46.09,
                longitude: -64.78,
                aqhi: None,
                observed: None,
                source_file: None,
            },
        ];

        assert_eq!(write_parquet(&records, &path).unwrap(), 2);

        let reader = SerializedFileReader::new(File::open(&path).unwrap()).unwrap();
        let metadata = reader.metadata();
        assert_eq!(metadata.file_metadata().num_rows(), 2);
        let columns: Vec<String> = metadata
            .file_metadata()
            .schema_descr()
            .columns()
            .iter()
            .map(|column| column.name().to_string())
            .collect();
        assert_eq!(columns, Observation::COLUMNS);
    }
}
