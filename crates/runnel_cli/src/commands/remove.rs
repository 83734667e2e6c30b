//! Remove command implementation.

use super::{ensure_exists, storage_options};
use runnel_core::MmapStorage;
use std::path::Path;

/// Runs the remove command.
pub fn run(root: Option<&Path>, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let options = storage_options(root);
    ensure_exists(&options, id)?;

    MmapStorage::remove(id, &options)?;
    println!("Removed log '{}'", id);
    println!("  {}", options.data_path(id).display());
    println!("  {}", options.header_path(id).display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::stream_config;
    use runnel_core::Stream;
    use tempfile::tempdir;

    #[test]
    fn removes_both_files() {
        let dir = tempdir().unwrap();
        let stream: Stream<i64> =
            Stream::open_with_config("cli", Some("doomed"), None, stream_config(Some(dir.path())))
                .unwrap();
        stream.close().unwrap();

        run(Some(dir.path()), "doomed").unwrap();
        assert!(!dir.path().join("doomed").exists());
        assert!(!dir.path().join("doomed_header").exists());
    }

    #[test]
    fn missing_log_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(run(Some(dir.path()), "absent").is_err());
    }
}
