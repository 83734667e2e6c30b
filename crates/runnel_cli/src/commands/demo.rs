//! Demo command implementation.
//!
//! Starts a number of writer threads that each append the same value many
//! times, and a number of reader threads that each consume every record from
//! the start of the log and check the total.

use super::{storage_options, stream_config, CliError};
use runnel_core::{CoreResult, MmapStorage, Stream};
use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::info;

/// Value every demo writer appends.
const VALUE: i64 = 3;

/// Demo run summary.
#[derive(Debug)]
pub struct DemoResult {
    /// Records published in total.
    pub records: u64,
    /// Final capacity of the data region.
    pub capacity: u64,
    /// Wall-clock time of the run.
    pub elapsed: Duration,
    /// Records published per second.
    pub throughput: f64,
}

/// Runs the demo command.
pub fn run(
    root: Option<&Path>,
    id: &str,
    writers: usize,
    readers: usize,
    count: usize,
    flush: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = demo(root, id, writers, readers, count, flush)?;
    info!(
        records = result.records,
        capacity = result.capacity,
        elapsed = ?result.elapsed,
        throughput = %format!("{:.0} records/s", result.throughput),
        "demo finished"
    );
    Ok(())
}

/// Recreates the log `id` and runs the writers and readers to completion.
pub fn demo(
    root: Option<&Path>,
    id: &str,
    writers: usize,
    readers: usize,
    count: usize,
    flush: bool,
) -> Result<DemoResult, Box<dyn std::error::Error>> {
    MmapStorage::remove(id, &storage_options(root))?;

    let config = stream_config(root).flush_on_write(flush);
    let stream: Stream<i64> = Stream::open_with_config("demo", Some(id), None, config)?;
    let total = writers * count;
    let expected = VALUE * total as i64;

    info!(id, writers, readers, count, "starting demo");
    let start = Instant::now();

    let reader_handles = (0..readers)
        .map(|reader_index| -> CoreResult<JoinHandle<Result<(), CliError>>> {
            let reader = stream.reader(0)?;
            Ok(thread::spawn(move || -> Result<(), CliError> {
                let mut sum = 0;
                for _ in 0..total {
                    match reader.read() {
                        Ok(value) => sum += value,
                        Err(_) => break,
                    }
                }
                if sum == expected {
                    Ok(())
                } else {
                    Err(CliError::SumMismatch {
                        reader: reader_index,
                        expected,
                        actual: sum,
                    })
                }
            }))
        })
        .collect::<CoreResult<Vec<_>>>()?;

    let writer_handles: Vec<_> = (0..writers)
        .map(|_| {
            let stream = stream.clone();
            thread::spawn(move || -> CoreResult<()> {
                let writer = stream.writer()?;
                for _ in 0..count {
                    writer.write(&VALUE)?;
                }
                Ok(())
            })
        })
        .collect();

    let mut failure = None;
    for handle in writer_handles {
        if let Err(e) = handle.join().map_err(|_| CliError::Panicked("writer"))? {
            failure.get_or_insert(e);
        }
    }
    if let Some(e) = failure {
        // Releases the readers still waiting for records.
        stream.close()?;
        return Err(e.into());
    }
    for handle in reader_handles {
        handle.join().map_err(|_| CliError::Panicked("reader"))??;
    }

    let elapsed = start.elapsed();
    let records = stream.size();
    let capacity = stream.header().capacity;
    stream.close()?;

    let throughput = if elapsed.as_secs_f64() > 0.0 {
        records as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };

    Ok(DemoResult {
        records,
        capacity,
        elapsed,
        throughput,
    })
}
