// In: src/modifier/mod.rs

// ====================================================================================
// ARCHITECTURAL OVERVIEW: The Modifier Pipeline
// ====================================================================================
//
// One input warehouse per pool unit, walked through a small state machine:
//
//   Load      -> WarehouseReader::open (corrupt trailer fails the unit)
//   Transform -> every block through the profile chain, in registration order
//   Emit      -> surviving blocks of a group are buffered, then written as a whole
//   Finalize  -> RollingWriter::finish, per-unit `UnitReport`
//   Aggregate -> `ReportReducer::merge` on the coordinator, after the pool joined
//
// A group is only written once its last block has been seen, which is what lets a
// profile drop a group after some of its blocks already passed.
// ====================================================================================

pub mod profile;

#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::block::{Block, Metadata};
use crate::config::ModifierConfig;
use crate::error::BloarkError;
use crate::logging::{self, LogProgressSink, ProgressSink};
use crate::pool::{CancelHandle, WorkerPool};
use crate::preload::{self, PreloadKind};
use crate::report::{DefaultReducer, ReportReducer, RunReport, UnitReport};
use crate::warehouse::rolling::unique_stems;
use crate::warehouse::{Naming, RollingWriter, WarehouseReader};

pub use self::profile::{FnProfile, IdentityProfile, Profile, Transformed};

/// Rewrites existing warehouses through an ordered chain of profiles.
pub struct Modifier {
    config: ModifierConfig,
    files: Vec<PathBuf>,
    profiles: Vec<Box<dyn Profile>>,
    pool: WorkerPool,
    progress: Arc<dyn ProgressSink>,
    reducer: Box<dyn ReportReducer>,
}

impl Modifier {
    pub fn new(config: ModifierConfig) -> Result<Self, BloarkError> {
        config.validate()?;
        logging::init_logging(config.verbosity, None)?;
        let pool = WorkerPool::new(config.workers)?;
        Ok(Self {
            config,
            files: Vec::new(),
            profiles: Vec::new(),
            pool,
            progress: Arc::new(LogProgressSink),
            reducer: Box::new(DefaultReducer::default()),
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

    pub fn config(&self) -> &ModifierConfig {
        &self.config
    }

    /// Adds every finalized warehouse under `path` to the queue. Returns the full queue.
    pub fn preload(&mut self, path: impl AsRef<Path>) -> Result<&[PathBuf], BloarkError> {
        let found = preload::preload(path, PreloadKind::Warehouses)?;
        self.files.extend(found);
        self.files.sort();
        self.files.dedup();
        Ok(&self.files)
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn retain_files<F>(&mut self, mut keep: F)
    where
        F: FnMut(&Path) -> bool,
    {
        self.files.retain(|p| keep(p.as_path()));
    }

    /// Appends a profile to the chain. Profiles run in the order they were added.
    pub fn add_profile<P: Profile + 'static>(&mut self, profile: P) -> &mut Self {
        self.profiles.push(Box::new(profile));
        self
    }

    pub fn add_boxed_profile(&mut self, profile: Box<dyn Profile>) -> &mut Self {
        self.profiles.push(profile);
        self
    }

    pub fn profile_names(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.name()).collect()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.pool.cancel_handle()
    }

    pub fn run(&self) -> Result<RunReport, BloarkError> {
        fs::create_dir_all(&self.config.output_dir)?;
        self.check_not_in_place()?;
        if self.profiles.is_empty() {
            log::warn!("No profiles registered, warehouses will be copied unchanged");
        }

        let start = Instant::now();
        let stems = unique_stems(self.files.iter().map(|p| warehouse_stem(p)).collect());
        log::info!(
            "Modifying {} warehouses into {} with {} workers, profiles: {:?}",
            self.files.len(),
            self.config.output_dir.display(),
            self.pool.workers(),
            self.profile_names()
        );

        let outcomes = self.pool.run(&self.files, self.progress.as_ref(), |idx, path| {
            modify_unit(path, &stems[idx], &self.config, &self.profiles)
        })?;

        let mut report = self.reducer.merge(outcomes);
        report.elapsed = start.elapsed();
        report.log_summary("Modify");
        Ok(report)
    }

    /// Warehouses are immutable; writing into a queued file's own directory could
    /// replace it.
    fn check_not_in_place(&self) -> Result<(), BloarkError> {
        let out = fs::canonicalize(&self.config.output_dir)?;
        for file in &self.files {
            let parent = file.parent().unwrap_or_else(|| Path::new("."));
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            if fs::canonicalize(parent).map_or(false, |p| p == out) {
                return Err(BloarkError::InvalidConfig(format!(
                    "output_dir {} contains input warehouse {}",
                    self.config.output_dir.display(),
                    file.display()
                )));
            }
        }
        Ok(())
    }
}

fn warehouse_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "warehouse".to_string())
}

/// Rewrites one warehouse. A failure removes every warehouse this unit wrote.
fn modify_unit(
    path: &Path,
    stem: &str,
    config: &ModifierConfig,
    profiles: &[Box<dyn Profile>],
) -> Result<UnitReport, BloarkError> {
    let reader = WarehouseReader::open(path)?;

    let mut group_metadata: HashMap<String, Metadata> = HashMap::new();
    for group in reader.groups() {
        if !group.metadata.is_empty() {
            group_metadata
                .entry(group.key.clone())
                .or_insert_with(|| group.metadata.clone());
        }
    }

    let mut sink = RollingWriter::new(
        &config.output_dir,
        Naming::Preserving {
            stem: stem.to_string(),
        },
        config.threshold,
        config.warehouse_options(),
    );
    let mut report = UnitReport::new(path);

    if let Err(e) = rewrite_blocks(reader.blocks(), profiles, &group_metadata, &mut sink, &mut report) {
        if let Err(cleanup) = sink.abort() {
            log::warn!("Cleanup after failed unit {} failed: {}", path.display(), cleanup);
        }
        return Err(e);
    }
    report.warehouses = sink.finish()?;

    log::debug!(
        "Modified {}: {} in, {} out, {} dropped ({} groups), {} profile errors",
        path.display(),
        report.blocks_in,
        report.blocks_out,
        report.blocks_dropped,
        report.groups_dropped,
        report.profile_errors
    );
    Ok(report)
}

/// What the profile chain decided for one block.
enum Verdict {
    Keep(Block),
    DropBlock,
    DropGroup,
}

fn apply_profiles(profiles: &[Box<dyn Profile>], block: Block) -> Result<Verdict, BloarkError> {
    let Block {
        group,
        mut content,
        mut metadata,
    } = block;

    for profile in profiles {
        let transformed = profile
            .transform(content, metadata)
            .map_err(|e| match e {
                BloarkError::Profile { .. } => e,
                other => BloarkError::Profile {
                    profile: profile.name().to_string(),
                    reason: other.to_string(),
                },
            })?;
        match transformed {
            Transformed::Keep {
                content: next_content,
                metadata: next_metadata,
            } => {
                if let Some((key, _)) = next_metadata.iter().find(|(_, v)| !v.is_storable()) {
                    return Err(BloarkError::Profile {
                        profile: profile.name().to_string(),
                        reason: format!("metadata {:?} holds a non-finite float", key),
                    });
                }
                content = next_content;
                metadata = next_metadata;
            }
            Transformed::DropBlock { metadata } => {
                log::trace!("Profile {} dropped a block of group {}: {:?}", profile.name(), group, metadata);
                return Ok(Verdict::DropBlock);
            }
            Transformed::DropGroup => {
                log::debug!("Profile {} dropped group {}", profile.name(), group);
                return Ok(Verdict::DropGroup);
            }
        }
    }
    Ok(Verdict::Keep(Block {
        group,
        content,
        metadata,
    }))
}

/// Per-unit transform loop. Buffers one group at a time.
fn rewrite_blocks<I>(
    blocks: I,
    profiles: &[Box<dyn Profile>],
    group_metadata: &HashMap<String, Metadata>,
    sink: &mut RollingWriter,
    report: &mut UnitReport,
) -> Result<(), BloarkError>
where
    I: Iterator<Item = Result<Block, BloarkError>>,
{
    let mut current: Option<String> = None;
    let mut buffer: Vec<Block> = Vec::new();
    let mut dropped: HashSet<String> = HashSet::new();

    for item in blocks {
        // A damaged frame cannot be skipped safely; it fails the unit.
        let block = item?;
        report.blocks_in += 1;

        if dropped.contains(&block.group) {
            report.blocks_dropped += 1;
            continue;
        }
        if current.as_deref() != Some(block.group.as_str()) {
            if let Some(key) = current.take() {
                flush_group(sink, &key, &mut buffer, group_metadata, report)?;
            }
            current = Some(block.group.clone());
        }

        let group = block.group.clone();
        match apply_profiles(profiles, block) {
            Ok(Verdict::Keep(block)) => buffer.push(block),
            Ok(Verdict::DropBlock) => report.blocks_dropped += 1,
            Ok(Verdict::DropGroup) => {
                report.blocks_dropped += 1 + buffer.len() as u64;
                report.groups_dropped += 1;
                buffer.clear();
                dropped.insert(group);
            }
            Err(e) if e.is_block_scoped() => {
                report.blocks_skipped += 1;
                report.profile_errors += 1;
                log::warn!("Skipping block of group {} in {}: {}", group, report.unit.display(), e);
            }
            Err(e) => return Err(e),
        }
    }

    if let Some(key) = current.take() {
        flush_group(sink, &key, &mut buffer, group_metadata, report)?;
    }
    Ok(())
}

fn flush_group(
    sink: &mut RollingWriter,
    key: &str,
    buffer: &mut Vec<Block>,
    group_metadata: &HashMap<String, Metadata>,
    report: &mut UnitReport,
) -> Result<(), BloarkError> {
    if buffer.is_empty() {
        return Ok(());
    }
    let metadata = group_metadata.get(key).cloned().unwrap_or_default();
    sink.write_group(key, buffer, metadata)?;
    report.blocks_out += buffer.len() as u64;
    buffer.clear();
    Ok(())
}
