use assert_cmd::Command;
use fewgraph_core::preprocess::{DocSplits, Engagements, GraphBuilder};
use fewgraph_core::{FeatureType, FileLayout};
use predicates::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

/// Artifacts for 12 documents, 2 per class in each split, 2 users per document.
fn write_artifacts(dir: &Path) {
    let mut by_doc = BTreeMap::new();
    let mut labels = HashMap::new();
    let mut vocab = HashMap::new();
    let mut splits = DocSplits::default();

    for i in 0..12 {
        let key = format!("doc{i:02}");
        by_doc.insert(key.clone(), vec![format!("{key}_a"), format!("{key}_b")]);
        labels.insert(key.clone(), i % 2);
        vocab.insert(key.clone(), vec![i % 2, 2 + i]);
        match i / 4 {
            0 => splits.train.push(key),
            1 => splits.val.push(key),
            _ => splits.test.push(key),
        }
    }
    let engagements = Engagements { by_doc, skipped: 0 };
    let users: BTreeSet<String> = engagements.users().into_iter().map(str::to_string).collect();

    let mut builder = GraphBuilder::new(splits, &users);
    builder
        .add_engagements(&engagements)
        .set_labels(&labels)
        .set_features(&vocab, &engagements, 0, FeatureType::OneHot);
    builder
        .write_artifacts(dir, &FileLayout::default(), 30)
        .unwrap();
}

#[test]
fn test_cli_stats() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_artifacts(dir.path());

    let mut cmd = Command::cargo_bin("fewgraph")?;
    cmd.arg("stats").arg(dir.path()).arg("--data").arg("gossipcop");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Documents:      12"))
        .stdout(predicate::str::contains("Users:          24"))
        .stdout(predicate::str::contains("Train/val/test: 4/4/4"))
        .stdout(predicate::str::contains("real"))
        .stdout(predicate::str::contains("0.500"));
    Ok(())
}

#[test]
fn test_cli_episodes() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_artifacts(dir.path());

    let mut cmd = Command::cargo_bin("fewgraph")?;
    cmd.arg("episodes")
        .arg(dir.path())
        .arg("--k-shot")
        .arg("1")
        .arg("--hops")
        .arg("1")
        .arg("--count")
        .arg("3");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("1 episodes per epoch (2-way 1-shot, 1 hops)"))
        .stdout(predicate::str::contains(
            "episode 0: support 2 targets / 6 nodes / 4 edges",
        ))
        .stdout(predicate::str::contains("episode 2:"));
    Ok(())
}

#[test]
fn test_cli_episodes_insufficient_data() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_artifacts(dir.path());

    let mut cmd = Command::cargo_bin("fewgraph")?;
    cmd.arg("episodes").arg(dir.path()).arg("--k-shot").arg("3");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Insufficient data"));
    Ok(())
}

#[test]
fn test_cli_eval() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_artifacts(dir.path());

    let mut cmd = Command::cargo_bin("fewgraph")?;
    cmd.arg("eval")
        .arg(dir.path())
        .arg("--k-shot")
        .arg("1")
        .arg("--hops")
        .arg("1")
        .arg("--workers")
        .arg("2")
        .arg("--split")
        .arg("test");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Prototype baseline (test split, 1 episodes"))
        .stdout(predicate::str::contains("Accuracy:"));
    Ok(())
}

#[test]
fn test_cli_eval_with_config_file() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_artifacts(dir.path());
    let config = dir.path().join("loader.json");
    fs::write(
        &config,
        r#"{"data_name": "gossipcop", "k_shot": 1, "hop_size": 1, "model": "gat", "data_dir": "ignored"}"#,
    )?;

    let mut cmd = Command::cargo_bin("fewgraph")?;
    cmd.arg("eval").arg(dir.path()).arg("--config").arg(&config);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("model gat"));
    Ok(())
}

#[test]
fn test_cli_preprocess_then_stats() -> Result<(), Box<dyn std::error::Error>> {
    let raw = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    let engagements = raw.path().join("engagements");
    fs::create_dir_all(&engagements)?;

    let mut labels = Vec::new();
    let mut vocab = Vec::new();
    for i in 0..10 {
        labels.push(format!(r#""d{i}": {}"#, i % 2));
        vocab.push(format!(r#""d{i}": [{i}]"#));
        fs::write(
            engagements.join(format!("d{i}.json")),
            format!(r#"{{"users": [{}, {}]}}"#, 100 + i, 100 + (i + 1) % 10),
        )?;
    }
    fs::write(engagements.join("d9.json"), "not json")?;
    fs::write(
        raw.path().join("doc2labels.json"),
        format!("{{{}}}", labels.join(",")),
    )?;
    fs::write(
        raw.path().join("doc_vocab.json"),
        format!("{{{}}}", vocab.join(",")),
    )?;

    let mut cmd = Command::cargo_bin("fewgraph")?;
    cmd.arg("preprocess")
        .arg(raw.path())
        .arg("-o")
        .arg(out.path())
        .arg("--threshold")
        .arg("1.0")
        .arg("--split-sizes")
        .arg("0.6,0.2,0.2");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Documents:            10"))
        .stdout(predicate::str::contains("Skipped engagements:  1"));

    assert!(out.path().join("doc2id_top30.json").exists());
    assert!(out.path().join("features_one-hot_top30.json").exists());

    let mut cmd = Command::cargo_bin("fewgraph")?;
    cmd.arg("stats").arg(out.path());
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Documents:      10"))
        .stdout(predicate::str::contains("Train/val/test: 6/2/2"));
    Ok(())
}

#[test]
fn test_cli_preprocess_all_users() -> Result<(), Box<dyn std::error::Error>> {
    let raw = tempfile::tempdir()?;
    let engagements = raw.path().join("engagements");
    fs::create_dir_all(&engagements)?;

    // user 999 shared every real document
    let mut labels = Vec::new();
    let mut vocab = Vec::new();
    for i in 0..8 {
        labels.push(format!(r#""d{i}": {}"#, i % 2));
        vocab.push(format!(r#""d{i}": [{i}]"#));
        let users = if i % 2 == 0 {
            format!("{}, 999", 100 + i)
        } else {
            format!("{}", 100 + i)
        };
        fs::write(
            engagements.join(format!("d{i}.json")),
            format!(r#"{{"users": [{users}]}}"#),
        )?;
    }
    fs::write(
        raw.path().join("doc2labels.json"),
        format!("{{{}}}", labels.join(",")),
    )?;
    fs::write(
        raw.path().join("doc_vocab.json"),
        format!("{{{}}}", vocab.join(",")),
    )?;

    let preprocess = |extra: &[&str]| -> Result<assert_cmd::assert::Assert, Box<dyn std::error::Error>> {
        let out = tempfile::tempdir()?;
        let mut cmd = Command::cargo_bin("fewgraph")?;
        cmd.arg("preprocess")
            .arg(raw.path())
            .arg("-o")
            .arg(out.path())
            .arg("--threshold")
            .arg("0.5")
            .arg("--split-sizes")
            .arg("0.5,0.25,0.25")
            .args(extra);
        Ok(cmd.assert())
    };

    preprocess(&[])?
        .success()
        .stdout(predicate::str::contains("Users:                8"));
    preprocess(&["--all-users"])?
        .success()
        .stdout(predicate::str::contains("Users:                9"));
    Ok(())
}

#[test]
fn test_cli_unknown_dataset()-> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let mut cmd = Command::cargo_bin("fewgraph")?;
    cmd.arg("stats").arg(dir.path()).arg("--data").arg("politifact");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("politifact"));
    Ok(())
}

#[test]
fn test_cli_missing_artifacts() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let mut cmd = Command::cargo_bin("fewgraph")?;
    cmd.arg("stats").arg(dir.path().join("nope"));
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load"));
    Ok(())
}
