use std::fs;
use std::path::Path;

use serde_json::json;

use super::*;
use crate::block::MetaValue;
use crate::config::Threshold;
use crate::warehouse::{WarehouseReader, WarehouseSummary};

fn block(group: &str, seq: i64) -> Block {
    Block::new(
        group,
        json!({ "text": format!("rev {seq} of {group}"), "revision_id": format!("{group}{seq}") }),
        Metadata::new(),
    )
    .with_meta("seq", seq)
    .with_meta("article_id", group)
}

/// Writes one input warehouse holding `groups` (key, revision count) with a title per group.
fn write_input(dir: &Path, name: &str, groups: &[(&str, i64)]) -> WarehouseSummary {
    let mut sink = RollingWriter::new(
        dir,
        Naming::Preserving { stem: name.into() },
        Threshold::blocks(10_000),
        Default::default(),
    );
    for (key, count) in groups {
        let blocks: Vec<Block> = (0..*count).map(|i| block(key, i)).collect();
        let mut meta = Metadata::new();
        meta.insert("title".into(), format!("Title {key}").into());
        sink.write_group(key, &blocks, meta).unwrap();
    }
    sink.finish().unwrap().remove(0)
}

fn read_all(path: &Path) -> Vec<Block> {
    WarehouseReader::open(path)
        .unwrap()
        .blocks()
        .collect::<Result<_, _>>()
        .unwrap()
}

fn modifier(out: &Path) -> Modifier {
    let mut config = ModifierConfig::new(out);
    config.threshold = Threshold::blocks(10_000);
    Modifier::new(config).unwrap()
}

#[test]
fn test_identity_profile_reproduces_input() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("in");
    let input = write_input(&input_dir, "part-a", &[("1", 3), ("2", 2), ("3", 4)]);

    let out = dir.path().join("out");
    let mut modifier = modifier(&out);
    modifier.add_profile(IdentityProfile);
    modifier.preload(&input_dir).unwrap();
    let report = modifier.run().unwrap();

    assert!(report.is_clean());
    assert_eq!(report.warehouses.len(), 1);
    let output = &report.warehouses[0];
    assert_eq!(output.path, out.join("part-a.blrk"));
    assert_eq!(read_all(&output.path), read_all(&input.path));

    // Group metadata is carried forward.
    let reader = WarehouseReader::open(&output.path).unwrap();
    assert_eq!(reader.groups()[1].metadata["title"], MetaValue::from("Title 2"));
    assert_eq!(reader.groups()[1].first_block, 3);
}

#[test]
fn test_group_drop_removes_seen_and_unseen_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("in");
    write_input(&input_dir, "w", &[("A", 2), ("B", 4), ("C", 1)]);

    let out = dir.path().join("out");
    let mut modifier = modifier(&out);
    // Drops B when its second revision shows up, after B/0 already passed.
    modifier.add_profile(FnProfile::new("drop-b", |content, metadata: Metadata| {
        let is_b1 = metadata.get("article_id").and_then(MetaValue::as_str) == Some("B")
            && metadata.get("seq").and_then(MetaValue::as_i64) == Some(1);
        if is_b1 {
            Ok(Transformed::from_parts(json!(null), Metadata::new()))
        } else {
            Ok(Transformed::keep(content, metadata))
        }
    }));
    modifier.preload(&input_dir).unwrap();
    let report = modifier.run().unwrap();

    let groups: Vec<String> = read_all(&report.warehouses[0].path)
        .into_iter()
        .map(|b| b.group)
        .collect();
    assert_eq!(groups, vec!["A", "A", "C"]);
    assert_eq!(report.groups_dropped, 1);
    assert_eq!(report.blocks_dropped, 4);
    assert_eq!(report.blocks_out, 3);
    assert_eq!(report.blocks_in, 7);
}

#[test]
fn test_profiles_chain_in_order_and_errors_only_skip_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("in");
    write_input(&input_dir, "w", &[("1", 3), ("2", 3)]);

    let out = dir.path().join("out");
    let mut modifier = modifier(&out);
    modifier
        .add_profile(FnProfile::new("tag", |content, mut metadata: Metadata| {
            metadata.insert("stage".into(), "tagged".into());
            Ok(Transformed::keep(content, metadata))
        }))
        .add_profile(FnProfile::new("check", |content, metadata: Metadata| {
            if metadata.get("stage").and_then(MetaValue::as_str) != Some("tagged") {
                return Err(BloarkError::Parse("profiles ran out of order".into()));
            }
            match metadata.get("seq").and_then(MetaValue::as_i64) {
                Some(0) => Ok(Transformed::DropBlock { metadata }),
                Some(2) if metadata.get("article_id").and_then(MetaValue::as_str) == Some("2") => {
                    Err(BloarkError::Parse("cannot handle this revision".into()))
                }
                _ => Ok(Transformed::keep(content, metadata)),
            }
        }));
    assert_eq!(modifier.profile_names(), vec!["tag", "check"]);
    modifier.preload(&input_dir).unwrap();
    let report = modifier.run().unwrap();

    assert!(report.units_failed.is_empty());
    assert_eq!(report.blocks_in, 6);
    assert_eq!(report.blocks_dropped, 2);
    assert_eq!(report.profile_errors, 1);
    assert_eq!(report.blocks_skipped, 1);
    assert_eq!(report.blocks_out, 3);
    assert_eq!(
        report.blocks_in,
        report.blocks_out + report.blocks_dropped + report.blocks_skipped
    );

    let blocks = read_all(&report.warehouses[0].path);
    assert!(blocks
        .iter()
        .all(|b| b.meta("stage").and_then(MetaValue::as_str) == Some("tagged")));
}

#[test]
fn test_corrupt_input_fails_its_unit_only() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("in");
    write_input(&input_dir, "good", &[("1", 2)]);
    let bad = write_input(&input_dir, "bad", &[("2", 2)]);
    let bytes = fs::read(&bad.path).unwrap();
    fs::write(&bad.path, &bytes[..bytes.len() - 3]).unwrap();

    let out = dir.path().join("out");
    let mut config = ModifierConfig::new(&out);
    config.workers = 2;
    let mut modifier = Modifier::new(config).unwrap();
    modifier.preload(&input_dir).unwrap();
    let report = modifier.run().unwrap();

    assert_eq!(report.units_succeeded, 1);
    assert_eq!(report.units_failed.len(), 1);
    assert_eq!(report.units_failed[0].unit, bad.path);
    assert!(report.units_failed[0].error.contains("Corrupt warehouse"));
    assert!(out.join("good.blrk").exists());
    assert!(!out.join("bad.blrk").exists());
}

#[test]
fn test_rollover_keeps_groups_whole_and_names_parts() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("in");
    write_input(&input_dir, "big", &[("1", 3), ("2", 3), ("3", 1)]);

    let out = dir.path().join("out");
    let mut config = ModifierConfig::new(&out);
    config.threshold = Threshold::blocks(2);
    let mut modifier = Modifier::new(config).unwrap();
    modifier.add_profile(IdentityProfile);
    modifier.preload(&input_dir).unwrap();
    let report = modifier.run().unwrap();

    let names: Vec<String> = report
        .warehouses
        .iter()
        .map(|w| w.path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["big-r001.blrk", "big-r002.blrk", "big.blrk"]);
    assert!(report.duplicate_groups.is_empty());
    let counts: Vec<u64> = report.warehouses.iter().map(|w| w.block_count).collect();
    assert_eq!(counts, vec![3, 1, 3]);
}

#[test]
fn test_output_dir_must_differ_from_input_dir() {
    let dir = tempfile::tempdir().unwrap();
    write_input(dir.path(), "w", &[("1", 1)]);

    let mut modifier = modifier(dir.path());
    modifier.preload(dir.path()).unwrap();
    assert!(matches!(modifier.run(), Err(BloarkError::InvalidConfig(_))));
}

#[test]
fn test_chained_passes_over_modifier_output() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("in");
    let input = write_input(&input_dir, "w", &[("1", 2), ("2", 2)]);

    let first_out = dir.path().join("pass1");
    let mut first = modifier(&first_out);
    first.add_profile(IdentityProfile);
    first.preload(&input_dir).unwrap();
    first.run().unwrap();

    let second_out = dir.path().join("pass2");
    let mut second = modifier(&second_out);
    second.add_profile(IdentityProfile);
    second.preload(&first_out).unwrap();
    let report = second.run().unwrap();

    assert_eq!(read_all(&report.warehouses[0].path), read_all(&input.path));
}

#[test]
fn test_crashed_unit_can_be_retried_into_same_output() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("in");
    write_input(&input_dir, "w", &[("1", 3), ("2", 3), ("3", 1)]);

    let out = dir.path().join("out");
    let mut config = ModifierConfig::new(&out);
    config.threshold = Threshold::blocks(2);
    let mut crashing = Modifier::new(config.clone()).unwrap();
    // Two warehouses are already finalized when group 3 comes along.
    crashing.add_profile(FnProfile::new("crash-on-3", |content, metadata: Metadata| {
        if metadata.get("article_id").and_then(MetaValue::as_str) == Some("3") {
            panic!("cannot handle article 3");
        }
        Ok(Transformed::keep(content, metadata))
    }));
    crashing.preload(&input_dir).unwrap();
    let report = crashing.run().unwrap();

    assert_eq!(report.units_failed.len(), 1);
    assert!(report.warehouses.is_empty());
    assert_eq!(fs::read_dir(&out).unwrap().count(), 0);

    let retry = report.retry_units();
    let mut again = Modifier::new(config).unwrap();
    again.add_profile(IdentityProfile);
    again.preload(&input_dir).unwrap();
    again.retain_files(|p| retry.iter().any(|r| r == p));
    let report = again.run().unwrap();

    assert!(report.is_clean());
    let names: Vec<String> = report
        .warehouses
        .iter()
        .map(|w| w.path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["w-r001.blrk", "w-r002.blrk", "w.blrk"]);
}

#[test]
fn test_non_finite_metadata_from_a_profile_skips_the_block() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("in");
    write_input(&input_dir, "w", &[("1", 3)]);

    let out = dir.path().join("out");
    let mut modifier = modifier(&out);
    modifier.add_profile(FnProfile::new("ratio", |content, mut metadata: Metadata| {
        let seq = metadata.get("seq").and_then(MetaValue::as_i64).unwrap_or(0);
        metadata.insert("ratio".into(), (1.0 / seq as f64 - 1.0).into());
        Ok(Transformed::keep(content, metadata))
    }));
    modifier.preload(&input_dir).unwrap();
    let report = modifier.run().unwrap();

    // seq 0 divides by zero and yields infinity.
    assert_eq!(report.units_succeeded, 1);
    assert_eq!(report.blocks_skipped, 1);
    assert_eq!(report.profile_errors, 1);
    let kept = read_all(&report.warehouses[0].path);
    assert_eq!(kept.len(), 2);
    assert!(kept.iter().all(|b| b.meta("ratio").is_some_and(MetaValue::is_storable)));
}
