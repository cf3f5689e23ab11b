/*!
Rewind CLI - Command-line inspector for stored entity snapshots.

This CLI reads snapshot records (or bare storage blobs) exported from the
snapshot table and lets you list, inspect, verify and compare them offline.
*/

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rewind_core::{AttributeMap, JsonStorageCodec, Snapshot, StorageCodec, VirtualAttribute};
use std::io::Read;
use tabled::{Table, Tabled};
use tracing::{debug, error, info};

#[derive(Parser)]
#[command(name = "rewind")]
#[command(about = "Inspect stored entity snapshots")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Treat inputs as bare storage blobs instead of snapshot records
    #[arg(long, global = true)]
    raw: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the snapshot records in a JSON array, oldest first
    List {
        /// File holding the records, or `-` for stdin
        file: String,
    },
    /// Show the stored attributes of a snapshot
    Inspect {
        /// Snapshot record or storage blob file, or `-` for stdin
        file: String,
    },
    /// Check that every stored attribute decodes through its cast
    Verify {
        /// Snapshot record or storage blob file, or `-` for stdin
        file: String,
    },
    /// Show the attributes that differ between two snapshots
    Diff {
        /// First snapshot
        left: String,
        /// Second snapshot
        right: String,
    },
}

#[derive(Tabled)]
struct SnapshotInfo {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Origin")]
    origin: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Attributes")]
    attributes: String,
    #[tabled(rename = "Size")]
    size: String,
}

#[derive(Tabled)]
struct AttributeRow {
    #[tabled(rename = "Attribute")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Cast")]
    cast: String,
    #[tabled(rename = "Relation Path")]
    relation_path: String,
}

#[derive(Tabled)]
struct DiffRow {
    #[tabled(rename = "Attribute")]
    name: String,
    #[tabled(rename = "Left")]
    left: String,
    #[tabled(rename = "Right")]
    right: String,
}

/// A decoded input: the record when one was given, and its attributes
struct Loaded {
    snapshot: Option<Snapshot>,
    attributes: AttributeMap,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let codec = JsonStorageCodec::new();
    let output = match &cli.command {
        Commands::List { file } => list_snapshots(&read_source(file)?, &codec)?,
        Commands::Inspect { file } => inspect_snapshot(&read_source(file)?, cli.raw, &codec)?,
        Commands::Verify { file } => verify_snapshot(&read_source(file)?, cli.raw, &codec)?,
        Commands::Diff { left, right } => diff_snapshots(
            &read_source(left)?,
            &read_source(right)?,
            cli.raw,
            &codec,
        )?,
    };
    println!("{output}");

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Read a file, or stdin when `source` is `-`
fn read_source(source: &str) -> Result<String, anyhow::Error> {
    if source == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read stdin")?;
        return Ok(buffer);
    }
    debug!("Reading {}", source);
    std::fs::read_to_string(source).with_context(|| format!("Failed to read {source}"))
}

fn load(text: &str, raw: bool, codec: &JsonStorageCodec) -> Result<Loaded, anyhow::Error> {
    if raw {
        let attributes = codec.decode(text.trim())?;
        return Ok(Loaded {
            snapshot: None,
            attributes,
        });
    }

    let snapshot: Snapshot =
        serde_json::from_str(text).context("Input is not a snapshot record (use --raw for blobs)")?;
    snapshot.validate()?;
    let attributes = snapshot.attributes(codec)?;
    Ok(Loaded {
        snapshot: Some(snapshot),
        attributes,
    })
}

fn list_snapshots(text: &str, codec: &JsonStorageCodec) -> Result<String, anyhow::Error> {
    let mut snapshots: Vec<Snapshot> =
        serde_json::from_str(text).context("Input is not a JSON array of snapshot records")?;
    if snapshots.is_empty() {
        return Ok("No snapshots found".to_string());
    }
    snapshots.sort_by_key(|snapshot| snapshot.created_at);

    let rows: Vec<SnapshotInfo> = snapshots
        .iter()
        .map(|snapshot| SnapshotInfo {
            id: snapshot.id.to_string(),
            origin: snapshot.origin().to_string(),
            created: format_timestamp(snapshot.created_at),
            attributes: match snapshot.attributes(codec) {
                Ok(attributes) => attributes.len().to_string(),
                Err(e) => {
                    error!("Snapshot {} has unreadable storage: {}", snapshot.id, e);
                    "invalid".to_string()
                }
            },
            size: format_size(snapshot.storage.len() as u64),
        })
        .collect();

    info!("Listed {} snapshots", rows.len());
    Ok(Table::new(rows).to_string())
}

fn inspect_snapshot(
    text: &str,
    raw: bool,
    codec: &JsonStorageCodec,
) -> Result<String, anyhow::Error> {
    let loaded = load(text, raw, codec)?;
    let mut output = String::new();

    if let Some(snapshot) = &loaded.snapshot {
        output.push_str("Snapshot Details:\n");
        output.push_str(&format!("  ID: {}\n", snapshot.id));
        output.push_str(&format!("  Origin: {}\n", snapshot.origin()));
        output.push_str(&format!("  Created: {}\n", format_timestamp(snapshot.created_at)));
        output.push_str(&format!("  Updated: {}\n", format_timestamp(snapshot.updated_at)));
        output.push_str(&format!("  Storage: {}\n", format_size(snapshot.storage.len() as u64)));
    }

    if loaded.attributes.is_empty() {
        output.push_str("No stored attributes");
        return Ok(output);
    }

    let rows: Vec<AttributeRow> = loaded
        .attributes
        .iter()
        .map(|attribute| AttributeRow {
            name: attribute.name().to_string(),
            value: display_value(attribute, codec),
            cast: attribute.cast().unwrap_or("-").to_string(),
            relation_path: attribute
                .relation_path()
                .map(|path| path.join("."))
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    output.push_str(&Table::new(rows).to_string());
    Ok(output)
}

fn verify_snapshot(
    text: &str,
    raw: bool,
    codec: &JsonStorageCodec,
) -> Result<String, anyhow::Error> {
    let loaded = load(text, raw, codec)?;

    let failures: Vec<String> = loaded
        .attributes
        .iter()
        .filter_map(|attribute| {
            codec
                .materialize(attribute, attribute.cast())
                .err()
                .map(|e| format!("  {}: {}", attribute.name(), e))
        })
        .collect();

    if !failures.is_empty() {
        for failure in &failures {
            error!("✗{}", failure);
        }
        bail!(
            "{} of {} attributes failed to decode:\n{}",
            failures.len(),
            loaded.attributes.len(),
            failures.join("\n")
        );
    }

    Ok(format!(
        "✓ Snapshot is valid: {} attributes decoded",
        loaded.attributes.len()
    ))
}

fn diff_snapshots(
    left: &str,
    right: &str,
    raw: bool,
    codec: &JsonStorageCodec,
) -> Result<String, anyhow::Error> {
    let left = load(left, raw, codec)?.attributes;
    let right = load(right, raw, codec)?.attributes;

    let mut names: Vec<&str> = left.names().collect();
    names.extend(right.names().filter(|name| !left.contains(name)));

    let rows: Vec<DiffRow> = names
        .into_iter()
        .filter_map(|name| {
            let (a, b) = (left.get(name), right.get(name));
            if a == b {
                return None;
            }
            Some(DiffRow {
                name: name.to_string(),
                left: a.map_or_else(|| "-".to_string(), |attr| display_value(attr, codec)),
                right: b.map_or_else(|| "-".to_string(), |attr| display_value(attr, codec)),
            })
        })
        .collect();

    if rows.is_empty() {
        return Ok("No differences".to_string());
    }
    Ok(Table::new(rows).to_string())
}

/// Materialized value with its recorded cast, or the stored form if that fails
fn display_value(attribute: &VirtualAttribute, codec: &JsonStorageCodec) -> String {
    match codec.materialize(attribute, attribute.cast()) {
        Ok(value) => value.to_string(),
        Err(e) => {
            debug!("Showing stored form of '{}': {}", attribute.name(), e);
            attribute.value().to_json().to_string()
        }
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rewind_core::Origin;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn blob(attributes: &AttributeMap) -> String {
        JsonStorageCodec::new().encode(attributes).unwrap()
    }

    fn record(storage: String, minute: u32) -> Snapshot {
        Snapshot::new(Origin::new("post", "1"), storage)
            .with_created_at(Utc.with_ymd_and_hms(2024, 3, 1, 10, minute, 0).unwrap())
    }

    fn sample_attributes() -> AttributeMap {
        AttributeMap::new()
            .with("title", "notes")
            .with_attribute(
                VirtualAttribute::plain("published_at", Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap())
                    .with_cast("datetime"),
            )
            .with_attribute(VirtualAttribute::related("bio", "analyst", ["author", "profile"]))
    }

    #[test]
    fn test_read_source_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{}}").unwrap();

        let text = read_source(file.path().to_str().unwrap()).unwrap();
        assert_eq!(text, "{}");
        assert!(read_source("/definitely/not/here.json").is_err());
    }

    #[test]
    fn test_inspect_record() {
        let snapshot = record(blob(&sample_attributes()), 0);
        let text = serde_json::to_string(&snapshot).unwrap();

        let output = inspect_snapshot(&text, false, &JsonStorageCodec::new()).unwrap();

        assert!(output.contains("Origin: post#1"));
        assert!(output.contains("Created: 2024-03-01 10:00:00"));
        assert!(output.contains("author.profile"));
        assert!(output.contains("datetime"));
        assert!(output.contains("analyst"));
    }

    #[test]
    fn test_inspect_raw_blob() {
        let output =
            inspect_snapshot(&blob(&sample_attributes()), true, &JsonStorageCodec::new()).unwrap();

        assert!(!output.contains("Snapshot Details"));
        assert!(output.contains("title"));
        assert!(output.contains("notes"));
    }

    #[test]
    fn test_inspect_requires_raw_flag_for_blobs() {
        let result = inspect_snapshot(&blob(&sample_attributes()), false, &JsonStorageCodec::new());
        assert!(result.is_err());
    }

    #[test]
    fn test_verify_reports_bad_values() {
        let codec = JsonStorageCodec::new();
        let output = verify_snapshot(&blob(&sample_attributes()), true, &codec).unwrap();
        assert!(output.contains("3 attributes decoded"));

        let broken = r#"{"published_at":{"attribute":"published_at","value":"yesterday","cast":"datetime"}}"#;
        let error = verify_snapshot(broken, true, &codec).unwrap_err();
        assert!(error.to_string().contains("published_at"));
    }

    #[test]
    fn test_verify_rejects_malformed_storage() {
        let result = verify_snapshot(r#"{"title": 1}"#, true, &JsonStorageCodec::new());
        assert!(result.is_err());
    }

    #[test]
    fn test_diff_shows_changed_and_missing_attributes() {
        let codec = JsonStorageCodec::new();
        let left = blob(&sample_attributes());
        let right = blob(&sample_attributes().with("title", "draft").with("tag", "rust"));

        let output = diff_snapshots(&left, &right, true, &codec).unwrap();

        assert!(output.contains("title"));
        assert!(output.contains("draft"));
        assert!(output.contains("tag"));
        assert!(!output.contains("bio"));

        let same = diff_snapshots(&left, &left, true, &codec).unwrap();
        assert_eq!(same, "No differences");
    }

    #[test]
    fn test_list_sorts_by_creation() {
        let codec = JsonStorageCodec::new();
        let late = record(blob(&sample_attributes()), 30);
        let early = record(blob(&AttributeMap::new().with("title", "a")), 5);
        let text = serde_json::to_string(&vec![late.clone(), early.clone()]).unwrap();

        let output = list_snapshots(&text, &codec).unwrap();

        let early_at = output.find(&early.id.to_string()).unwrap();
        let late_at = output.find(&late.id.to_string()).unwrap();
        assert!(early_at < late_at);
        assert_eq!(list_snapshots("[]", &codec).unwrap(), "No snapshots found");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }
}
