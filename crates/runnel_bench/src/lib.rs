//! Benchmark utilities.

use runnel_core::{Stream, StreamConfig};
use tempfile::TempDir;

/// A stream in a private temporary directory.
///
/// The directory is deleted when the value is dropped.
pub struct BenchStream {
    /// The open stream.
    pub stream: Stream<i64>,
    _dir: TempDir,
}

impl BenchStream {
    /// Opens a fresh stream with `config` rooted in a new temporary directory.
    pub fn new(config: StreamConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let stream =
            Stream::open_with_config("bench", Some("bench"), None, config.root(dir.path()))
                .unwrap();
        Self { stream, _dir: dir }
    }

    /// Opens another handle on the same log.
    pub fn reopen(&self) -> Stream<i64> {
        Stream::open_with_config(
            "bench",
            Some("bench"),
            None,
            self.stream.config().clone(),
        )
        .unwrap()
    }
}

/// Writes `count` records with one writer.
pub fn fill(stream: &Stream<i64>, count: i64) {
    let writer = stream.writer().unwrap();
    for i in 0..count {
        writer.write(&i).unwrap();
    }
}
