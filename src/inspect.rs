// In: src/inspect.rs

//! Quick looks into warehouses without running a pipeline, and plain-JSON exports.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::block::Block;
use crate::codec::{self, SinkFormat};
use crate::config::WarehouseCompression;
use crate::error::BloarkError;
use crate::logging::ProgressSink;
use crate::pool::{UnitOutcome, WorkerPool};
use crate::report::FailedUnit;
use crate::warehouse::rolling::unique_stems;
use crate::warehouse::WarehouseReader;

/// One block picked from a random warehouse, plus the shape of its data.
#[derive(Debug, Clone, Serialize)]
pub struct Glimpse {
    pub path: PathBuf,
    pub block: Block,
    pub schema: Value,
}

/// Picks one of `paths` at random and returns its first block.
///
/// Returns `None` if there is nothing to look at.
pub fn glimpse(paths: &[PathBuf]) -> Result<Option<Glimpse>, BloarkError> {
    if paths.is_empty() {
        log::warn!("No warehouse is loaded.");
        return Ok(None);
    }
    let picked = &paths[rand::rng().random_range(0..paths.len())];
    log::info!("Randomly chosen warehouse: {}", picked.display());

    let block = match WarehouseReader::open(picked)?.blocks().next() {
        Some(block) => block?,
        None => {
            log::warn!("Warehouse {} holds no blocks.", picked.display());
            return Ok(None);
        }
    };
    let schema = schema_of(&serde_json::to_value(&block)?);
    Ok(Some(Glimpse {
        path: picked.clone(),
        block,
        schema,
    }))
}

/// Sketches the structure of a JSON value.
///
/// Objects map each key to the schema of its value, arrays become
/// `[schema_of(first), len]`, empty containers become `"empty"` and scalars become
/// their type name.
pub fn schema_of(value: &Value) -> Value {
    match value {
        Value::Object(map) if map.is_empty() => Value::from("empty"),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), schema_of(v)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => match items.first() {
            None => Value::from("empty"),
            Some(first) => Value::Array(vec![schema_of(first), Value::from(items.len())]),
        },
        Value::Null => Value::from("null"),
        Value::Bool(_) => Value::from("bool"),
        Value::Number(n) if n.is_f64() => Value::from("float"),
        Value::Number(_) => Value::from("int"),
        Value::String(_) => Value::from("str"),
    }
}

/// What the index of a warehouse says, without decoding a single block.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WarehouseDescription {
    pub path: PathBuf,
    pub writer_version: String,
    pub compression: WarehouseCompression,
    pub block_count: u64,
    pub group_count: usize,
    pub raw_bytes: u64,
    pub file_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
}

pub fn describe(path: impl AsRef<Path>) -> Result<WarehouseDescription, BloarkError> {
    let path = path.as_ref();
    let reader = WarehouseReader::open(path)?;
    let meta = fs::metadata(path)?;
    let footer = reader.footer();
    Ok(WarehouseDescription {
        path: path.to_path_buf(),
        writer_version: footer.writer_version.clone(),
        compression: footer.compression,
        block_count: footer.block_count,
        group_count: footer.group_keys().len(),
        raw_bytes: footer.raw_bytes,
        file_bytes: meta.len(),
        modified: meta.modified().ok().map(DateTime::<Utc>::from),
    })
}

/// One warehouse written out as JSON lines.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExportedFile {
    pub warehouse: PathBuf,
    pub path: PathBuf,
    pub blocks: u64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ExportReport {
    pub files: Vec<ExportedFile>,
    pub units_failed: Vec<FailedUnit>,
    pub units_not_run: Vec<PathBuf>,
    pub elapsed: Duration,
}

impl ExportReport {
    pub fn is_clean(&self) -> bool {
        self.units_failed.is_empty() && self.units_not_run.is_empty()
    }
}

/// Writes every block of each warehouse in `paths` to `{stem}.jsonl` (or
/// `{stem}.jsonl.zst`) inside `output_dir`, one serialized block per line.
///
/// Warehouses are exported in parallel on `pool`. A file only appears under its
/// final name once it is complete; a failed warehouse leaves nothing behind.
pub fn export(
    paths: &[PathBuf],
    output_dir: impl AsRef<Path>,
    format: SinkFormat,
    pool: &WorkerPool,
    progress: &dyn ProgressSink,
) -> Result<ExportReport, BloarkError> {
    let output_dir = output_dir.as_ref();
    fs::create_dir_all(output_dir)?;
    let start = Instant::now();
    let stems = unique_stems(
        paths
            .iter()
            .map(|p| {
                p.file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "warehouse".to_string())
            })
            .collect(),
    );
    let extension = match format {
        SinkFormat::Plain => "jsonl",
        SinkFormat::Zstd { .. } => "jsonl.zst",
    };
    log::info!(
        "Exporting {} warehouses into {} with {} workers",
        paths.len(),
        output_dir.display(),
        pool.workers()
    );

    let outcomes = pool.run(paths, progress, |idx, path| {
        let target = output_dir.join(format!("{}.{}", stems[idx], extension));
        export_unit(path, &target, format)
    })?;

    let mut report = ExportReport::default();
    for outcome in outcomes {
        match outcome {
            UnitOutcome::Succeeded { value, .. } => report.files.push(value),
            UnitOutcome::Failed { unit, error } => report.units_failed.push(FailedUnit {
                unit,
                error: error.to_string(),
            }),
            UnitOutcome::NotRun { unit } => report.units_not_run.push(unit),
        }
    }
    report.elapsed = start.elapsed();
    log::info!(
        "Export finished in {:.2?}: {} files, {} failed, {} not run",
        report.elapsed,
        report.files.len(),
        report.units_failed.len(),
        report.units_not_run.len()
    );
    Ok(report)
}

fn export_unit(warehouse: &Path, target: &Path, format: SinkFormat) -> Result<ExportedFile, BloarkError> {
    let mut partial = target.as_os_str().to_os_string();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    match write_jsonl(warehouse, &partial, format) {
        Ok(blocks) => {
            fs::rename(&partial, target)?;
            log::debug!("Exported {} blocks to {}", blocks, target.display());
            Ok(ExportedFile {
                warehouse: warehouse.to_path_buf(),
                path: target.to_path_buf(),
                blocks,
            })
        }
        Err(e) => {
            if let Err(cleanup) = fs::remove_file(&partial) {
                log::debug!("No partial export to remove at {}: {}", partial.display(), cleanup);
            }
            Err(e)
        }
    }
}

fn write_jsonl(warehouse: &Path, out: &Path, format: SinkFormat) -> Result<u64, BloarkError> {
    let reader = WarehouseReader::open(warehouse)?;
    let mut sink = codec::open_write(out, format)?;
    let mut blocks = 0u64;
    for block in reader.blocks() {
        let line = block?.to_record_bytes()?;
        sink.write_all(&line)?;
        sink.write_all(b"\n")?;
        blocks += 1;
    }
    sink.finish()?;
    Ok(blocks)
}
