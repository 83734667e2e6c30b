//! Inspect command implementation.

use super::{ensure_exists, storage_options, CliError};
use runnel_storage::{StreamHeader, HEADER_SIZE};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Log inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Log id.
    pub id: String,
    /// Data file path.
    pub data_path: String,
    /// Header file path.
    pub header_path: String,
    /// Data file size in bytes.
    pub data_size: u64,
    /// Capacity recorded in the header.
    pub capacity: u64,
    /// One past the last reserved byte.
    pub tail: u64,
    /// One past the last published byte.
    pub last_message: u64,
    /// Number of published records.
    pub entry_count: u64,
    /// Reserved bytes as a percentage of capacity.
    pub utilization: u64,
}

/// Runs the inspect command.
pub fn run(root: Option<&Path>, id: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(root, id)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Reads the header file of `id` without mapping it.
pub fn inspect(root: Option<&Path>, id: &str) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let options = storage_options(root);
    ensure_exists(&options, id)?;

    let data_path = options.data_path(id);
    let header_path = options.header_path(id);

    let bytes = fs::read(&header_path)?;
    let header = StreamHeader::decode(&bytes).ok_or_else(|| CliError::TruncatedHeader {
        path: header_path.clone(),
        len: bytes.len(),
    })?;
    let data_size = fs::metadata(&data_path)?.len();

    Ok(InspectResult {
        id: id.to_string(),
        data_path: data_path.display().to_string(),
        header_path: header_path.display().to_string(),
        data_size,
        capacity: header.capacity,
        tail: header.tail,
        last_message: header.last_message,
        entry_count: header.entry_count,
        utilization: header.utilization(),
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Runnel Log Inspection");
    println!("=====================");
    println!();
    println!("Id:     {}", result.id);
    println!("Data:   {}", result.data_path);
    println!("Header: {} ({HEADER_SIZE} bytes)", result.header_path);
    println!();
    println!("Storage:");
    println!("  Data file size: {}", format_size(result.data_size));
    println!("  Capacity:       {}", format_size(result.capacity));
    println!("  Utilization:    {}%", result.utilization);
    println!();
    println!("Header:");
    println!("  Tail:          {}", result.tail);
    println!("  Last message:  {}", result.last_message);
    println!("  Entry count:   {}", result.entry_count);

    if result.tail != result.last_message {
        println!();
        println!(
            "  {} reserved bytes not yet published",
            result.tail.saturating_sub(result.last_message)
        );
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
