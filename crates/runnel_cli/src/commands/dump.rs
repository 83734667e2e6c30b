//! Dump command implementation.

use super::{ensure_exists, storage_options, stream_config};
use runnel_core::Stream;
use serde::Serialize;
use std::path::Path;

/// Size of the records this command prints.
const RECORD_SIZE: u64 = std::mem::size_of::<i64>() as u64;

/// One published record.
#[derive(Debug, Serialize)]
pub struct RecordInfo {
    /// Index of the record.
    pub index: u64,
    /// Byte offset of the record.
    pub offset: u64,
    /// Record value.
    pub value: i64,
}

/// Runs the dump command.
pub fn run(
    root: Option<&Path>,
    id: &str,
    offset: u64,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let records = read_records(root, id, offset, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            print_text_output(&records);
        }
    }

    Ok(())
}

/// Collects published records from byte `offset` on.
pub fn read_records(
    root: Option<&Path>,
    id: &str,
    offset: u64,
    limit: Option<usize>,
) -> Result<Vec<RecordInfo>, Box<dyn std::error::Error>> {
    if offset % RECORD_SIZE != 0 {
        return Err(format!("offset {offset} is not a multiple of {RECORD_SIZE}").into());
    }
    ensure_exists(&storage_options(root), id)?;

    let stream: Stream<i64> = Stream::open_with_config("dump", Some(id), None, stream_config(root))?;
    let limit = limit.unwrap_or(usize::MAX);

    let published = stream.header().last_message / RECORD_SIZE;
    let mut records = Vec::new();
    let mut index = offset / RECORD_SIZE;
    while index < published && records.len() < limit {
        records.push(RecordInfo {
            index,
            offset: index * RECORD_SIZE,
            value: stream.get(index)?,
        });
        index += 1;
    }

    stream.close()?;
    Ok(records)
}

fn print_text_output(records: &[RecordInfo]) {
    println!("Records ({} total)", records.len());
    println!("================");
    println!();

    for record in records {
        println!(
            "[{:>8}] offset={:<10} value={}",
            record.index, record.offset, record.value
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn populate(dir: &Path, id: &str, count: i64) {
        let stream: Stream<i64> =
            Stream::open_with_config("cli", Some(id), None, stream_config(Some(dir))).unwrap();
        let writer = stream.writer().unwrap();
        for i in 0..count {
            writer.write(&(i * 10)).unwrap();
        }
    }

    #[test]
    fn dumps_published_records() {
        let dir = tempdir().unwrap();
        populate(dir.path(), "dumped", 5);

        let records = read_records(Some(dir.path()), "dumped", 0, None).unwrap();
        let values: Vec<i64> = records.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![0, 10, 20, 30, 40]);
        assert_eq!(records[4].offset, 32);
    }

    #[test]
    fn offset_and_limit() {
        let dir = tempdir().unwrap();
        populate(dir.path(), "window", 10);

        let records = read_records(Some(dir.path()), "window", 16, Some(3)).unwrap();
        let values: Vec<i64> = records.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![20, 30, 40]);
        assert_eq!(records[0].index, 2);
    }

    #[test]
    fn misaligned_offset_rejected() {
        let dir = tempdir().unwrap();
        populate(dir.path(), "odd", 1);
        assert!(read_records(Some(dir.path()), "odd", 3, None).is_err());
    }

    #[test]
    fn missing_log_is_not_created() {
        let dir = tempdir().unwrap();
        assert!(read_records(Some(dir.path()), "absent", 0, None).is_err());
        assert!(!dir.path().join("absent").exists());
    }
}
