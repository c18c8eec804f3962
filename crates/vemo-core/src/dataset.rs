//! CSV dataset loading.
//!
//! A dataset is one comma-separated file per device with a header row. Row
//! order is the replay order; every cell goes through [`FieldValue::coerce`].
//!
//! [`FieldValue::coerce`]: crate::types::FieldValue::coerce

use crate::error::{CoreError, Result};
use crate::types::TelemetryRecord;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// Load every row of a dataset file
pub fn load_dataset(path: impl AsRef<Path>) -> Result<Vec<TelemetryRecord>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(CoreError::DatasetNotFound(path.to_path_buf()));
    }

    let file = File::open(path)?;
    let records = parse_dataset(file)?;
    debug!(path = %path.display(), rows = records.len(), "Loaded dataset");
    Ok(records)
}

/// Parse CSV text from any reader.
///
/// Short rows only carry the columns they have; cells beyond the header are ignored.
/// Malformed rows, including cells that are not UTF-8, are skipped with a warning.
pub fn parse_dataset<R: Read>(reader: R) -> Result<Vec<TelemetryRecord>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut records = Vec::new();
    for (index, row) in csv_reader.byte_records().enumerate() {
        let line = index + 2;
        let row = match row {
            Ok(row) => row,
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                warn!(line, error = %e, "Skipping malformed row");
                continue;
            }
        };
        let cells = match row
            .iter()
            .map(std::str::from_utf8)
            .collect::<std::result::Result<Vec<&str>, _>>()
        {
            Ok(cells) => cells,
            Err(e) => {
                warn!(line, error = %e, "Skipping row that is not valid UTF-8");
                continue;
            }
        };
        let record = TelemetryRecord::from_cells(headers.iter().cloned().zip(cells));
        records.push(record);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldValue, CO2_FIELD, DEVICE_ID_FIELD};
    use std::io::Write;
    use tempfile::TempDir;

    const SAMPLE: &str = "\
timestep_time,vehicle_CO2,vehicle_id,vehicle_type
0.00,12.5,v1,veh_passenger
1.00,,v1,veh_passenger
2.00,30.0,v1,veh_passenger
";

    #[test]
    fn test_parse_dataset_coerces_cells() {
        let records = parse_dataset(SAMPLE.as_bytes()).unwrap();
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].get(CO2_FIELD), Some(&FieldValue::Number(12.5)));
        assert_eq!(records[1].get(CO2_FIELD), Some(&FieldValue::Number(0.0)));
        assert_eq!(records[2].get(DEVICE_ID_FIELD), Some(&FieldValue::Text("v1".into())));

        let keys: Vec<&str> = records[0].iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["timestep_time", "vehicle_CO2", "vehicle_id", "vehicle_type"]);
    }

    #[test]
    fn test_short_rows_keep_present_columns() {
        let records = parse_dataset("a,b,c\n1,2\n".as_bytes()).unwrap();
        assert_eq!(records[0].len(), 2);
        assert!(records[0].get("c").is_none());
    }

    #[test]
    fn test_invalid_row_is_skipped() {
        let records = parse_dataset(&b"vehicle_id,vehicle_CO2\nv1,10\nv1,\xff\nv1,30\n"[..]).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get(CO2_FIELD), Some(&FieldValue::Number(10.0)));
        assert_eq!(records[1].get(CO2_FIELD), Some(&FieldValue::Number(30.0)));
    }

    #[test]
    fn test_load_dataset_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = load_dataset(dir.path().join("vehicle9.csv")).unwrap_err();
        assert!(matches!(err, CoreError::DatasetNotFound(_)));
    }

    #[test]
    fn test_load_dataset_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vehicle0.csv");
        let mut file = File::create(&path).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let records = load_dataset(&path).unwrap();
        assert_eq!(records.len(), 3);
    }
}
