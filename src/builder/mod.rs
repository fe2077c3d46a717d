// In: src/builder/mod.rs

// ====================================================================================
// ARCHITECTURAL OVERVIEW: The Builder
// ====================================================================================
//
// Raw dump -> warehouses, one source file per pool unit:
//
//   [codec::open_read] -> [RevisionParser] -> group boundary detection -> [RollingWriter]
//
// Revisions of one page arrive contiguously. Every block is streamed straight into
// the unit's open warehouse; the threshold is only consulted when the page id
// changes, so a page always lands in exactly one warehouse.
//
// Each unit owns a private sequence of output files named after its source, so no
// two workers ever touch the same warehouse.
// ====================================================================================

pub mod categories;
pub mod parser;


use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::block::Block;
use crate::codec;
use crate::config::BuilderConfig;
use crate::error::BloarkError;
use crate::logging::{self, LogProgressSink, ProgressSink};
use crate::pool::{CancelHandle, WorkerPool};
use crate::preload::{self, PreloadKind};
use crate::report::{DefaultReducer, ReportReducer, RunReport, UnitReport};
use crate::warehouse::rolling::unique_stems;
use crate::warehouse::{Naming, RollingWriter};

use self::categories::GroupSummary;
use self::parser::RevisionParser;

/// Turns raw revision dumps into warehouses.
pub struct Builder {
    config: BuilderConfig,
    files: Vec<PathBuf>,
    pool: WorkerPool,
    progress: Arc<dyn ProgressSink>,
    reducer: Box<dyn ReportReducer>,
}

impl Builder {
    pub fn new(config: BuilderConfig) -> Result<Self, BloarkError> {
        config.validate()?;
        logging::init_logging(config.verbosity, None)?;
        let pool = WorkerPool::new(config.workers)?;
        let reducer = DefaultReducer {
            verify_group_uniqueness: config.verify_group_uniqueness,
        };
        Ok(Self {
            config,
            files: Vec::new(),
            pool,
            progress: Arc::new(LogProgressSink),
            reducer: Box::new(reducer),
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_reducer(mut self, reducer: Box<dyn ReportReducer>) -> Self {
        self.reducer = reducer;
        self
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Adds every source dump under `path` to the queue. Returns the full queue.
    pub fn preload(&mut self, path: impl AsRef<Path>) -> Result<&[PathBuf], BloarkError> {
        let found = preload::preload(path, PreloadKind::Sources)?;
        self.files.extend(found);
        self.files.sort();
        self.files.dedup();
        Ok(&self.files)
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Keeps only the queued files for which `keep` returns true.
    pub fn retain_files<F>(&mut self, mut keep: F)
    where
        F: FnMut(&Path) -> bool,
    {
        self.files.retain(|p| keep(p.as_path()));
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.pool.cancel_handle()
    }

    /// Builds warehouses from every queued file across the worker pool.
    pub fn run(&self) -> Result<RunReport, BloarkError> {
        fs::create_dir_all(&self.config.output_dir)?;
        let start = Instant::now();
        let stems = output_stems(&self.files);
        log::info!(
            "Building {} source files into {} with {} workers",
            self.files.len(),
            self.config.output_dir.display(),
            self.pool.workers()
        );

        let outcomes = self.pool.run(&self.files, self.progress.as_ref(), |idx, path| {
            build_unit(path, &stems[idx], &self.config)
        })?;

        let mut report = self.reducer.merge(outcomes);
        report.elapsed = start.elapsed();
        report.log_summary("Build");
        Ok(report)
    }
}

/// Output file stems, one per queued source.
fn output_stems(files: &[PathBuf]) -> Vec<String> {
    unique_stems(files.iter().map(|p| source_stem(p)).collect())
}

/// `enwiki-p1p42.xml.bz2` -> `enwiki-p1p42`
fn source_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "source".to_string());
    let mut stem = name.as_str();
    for ext in [".bz2", ".gz", ".zst", ".xml", ".txt"] {
        if stem.len() > ext.len() && stem.to_ascii_lowercase().ends_with(ext) {
            stem = &stem[..stem.len() - ext.len()];
        }
    }
    stem.to_string()
}

/// Processes one source file. A failure removes every warehouse this unit wrote.
fn build_unit(path: &Path, stem: &str, config: &BuilderConfig) -> Result<UnitReport, BloarkError> {
    let started = Instant::now();
    let source = codec::open_read(path)?;
    let parser = RevisionParser::new(source, path);
    let mut sink = RollingWriter::new(
        &config.output_dir,
        Naming::Sequenced {
            stem: stem.to_string(),
        },
        config.threshold,
        config.warehouse_options(),
    );

    let mut report = UnitReport::new(path);
    if let Err(e) = route_blocks(parser, &mut sink, &mut report) {
        if let Err(cleanup) = sink.abort() {
            log::warn!("Cleanup after failed unit {} failed: {}", path.display(), cleanup);
        }
        return Err(e);
    }
    report.warehouses = sink.finish()?;

    log::debug!(
        "Built {} in {:.2}s: {} blocks into {} warehouses, {} skipped",
        path.display(),
        started.elapsed().as_secs_f64(),
        report.blocks_out,
        report.warehouses.len(),
        report.blocks_skipped
    );
    Ok(report)
}

/// Streams parsed blocks into the sink, closing a group whenever the key changes.
fn route_blocks<I>(
    blocks: I,
    sink: &mut RollingWriter,
    report: &mut UnitReport,
) -> Result<(), BloarkError>
where
    I: Iterator<Item = Result<Block, BloarkError>>,
{
    let mut current: Option<(String, GroupSummary)> = None;
    let mut closed: HashSet<String> = HashSet::new();

    for item in blocks {
        report.blocks_in += 1;
        let block = match item {
            Ok(block) => block,
            Err(e) if e.is_block_scoped() => {
                report.blocks_skipped += 1;
                log::warn!("Skipping block in {}: {}", report.unit.display(), e);
                continue;
            }
            Err(e) => return Err(e),
        };

        let same_group = matches!(&current, Some((key, _)) if *key == block.group);
        if !same_group {
            if let Some((key, summary)) = current.take() {
                sink.end_group(&key, summary.into_metadata())?;
                closed.insert(key);
            }
            if closed.contains(&block.group) {
                log::warn!(
                    "Group '{}' reappears non-contiguously in {}",
                    block.group,
                    report.unit.display()
                );
            }
            current = Some((block.group.clone(), GroupSummary::default()));
        }

        if let Some((_, summary)) = current.as_mut() {
            summary.observe(&block);
        }
        sink.append(&block)?;
        report.blocks_out += 1;
    }

    if let Some((key, summary)) = current.take() {
        sink.end_group(&key, summary.into_metadata())?;
    }
    Ok(())
}
