use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use god_learn::knowledge::KnowledgeStore;
use god_learn::manifest::ManifestStore;
use god_learn::models::{doc_id_for, sha256_hex, IngestStatus, KnowledgeUnit, SourceRef};

const ALPHA: &str = "The mind is the idea of the body.\n\nAn idea of an affection of the body involves the nature of the body.";
const BETA: &str = "Desire is the very essence of man.\n\nJoy is a passion by which the mind passes to a greater perfection.";
const GAMMA: &str = "Rivers carry sediment to the sea.\n\nDeltas form where the current slows down.";

fn god_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("god");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let corpus = root.join("corpus");
    fs::create_dir_all(&corpus).unwrap();
    fs::write(corpus.join("alpha.md"), ALPHA).unwrap();
    fs::write(corpus.join("beta.md"), BETA).unwrap();
    fs::write(corpus.join("gamma.txt"), GAMMA).unwrap();

    let config_content = format!(
        r#"[paths]
data_dir = "{root}/data"

[corpus]
root = "{root}/corpus"
include_globs = ["**/*.md", "**/*.txt"]

[embedding]
provider = "hashing"
dims = 64
"#,
        root = root.display()
    );

    let config_path = config_dir.join("god.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_god(config_path: &Path, args: &[&str]) -> (String, String, i32) {
    let binary = god_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run god binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.code().unwrap_or(-1))
}

fn run_ok(config_path: &Path, args: &[&str]) -> String {
    let (stdout, stderr, code) = run_god(config_path, args);
    assert_eq!(code, 0, "{:?} failed: stdout={}, stderr={}", args, stdout, stderr);
    stdout
}

fn data_dir(tmp: &TempDir) -> PathBuf {
    tmp.path().join("data")
}

fn chunk_id(path_rel: &str, content: &str) -> String {
    let doc_id = doc_id_for(path_rel, &sha256_hex(content.as_bytes()));
    format!("{}:00000", doc_id)
}

fn ku(id: &str, claim: &str, chunk_id: &str) -> KnowledgeUnit {
    KnowledgeUnit {
        id: id.to_string(),
        claim: claim.to_string(),
        sources: vec![SourceRef {
            chunk_id: chunk_id.to_string(),
            page_range: None,
        }],
        confidence: 0.9,
        methodology: "manual".to_string(),
    }
}

fn seed_knowledge(tmp: &TempDir) {
    let store = KnowledgeStore::new(&data_dir(tmp).join("knowledge"));
    let alpha = chunk_id("alpha.md", ALPHA);
    let beta = chunk_id("beta.md", BETA);
    store
        .append(&ku("ku-001", "The mind is the idea of the body.", &alpha))
        .unwrap();
    store
        .append(&ku("ku-002", "The mind is the idea of the body and its affections.", &alpha))
        .unwrap();
    store
        .append(&ku("ku-003", "Joy is a passion by which the mind passes to greater perfection.", &beta))
        .unwrap();
}

fn parse_json(stdout: &str) -> serde_json::Value {
    serde_json::from_str(stdout).unwrap_or_else(|e| panic!("invalid JSON ({}): {}", e, stdout))
}

fn issue_types(report: &serde_json::Value) -> Vec<String> {
    report["issues"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["issue_type"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn test_ingest_records_every_document() {
    let (tmp, config_path) = setup_test_env();

    let stdout = run_ok(&config_path, &["ingest"]);
    assert!(stdout.contains("embed phase"));

    let manifest = ManifestStore::open(&data_dir(&tmp).join("manifest.jsonl")).unwrap();
    assert_eq!(manifest.total_records(), 3);
    assert!(manifest
        .latest_records()
        .iter()
        .all(|r| r.status == IngestStatus::Ok && r.chunk_count == 1));
    assert!(data_dir(&tmp).join("vectors.sqlite").exists());
}

#[test]
fn test_ingest_skips_unchanged() {
    let (tmp, config_path) = setup_test_env();

    run_ok(&config_path, &["ingest"]);
    let stdout = run_ok(&config_path, &["ingest"]);
    assert!(stdout.contains("skipped:     3"), "{}", stdout);

    let stdout = run_ok(&config_path, &["ingest", "--force"]);
    assert!(stdout.contains("ok:          3"), "{}", stdout);

    let manifest = ManifestStore::open(&data_dir(&tmp).join("manifest.jsonl")).unwrap();
    assert_eq!(manifest.total_records(), 6);
}

#[test]
fn test_ingest_dry_run_writes_nothing() {
    let (tmp, config_path) = setup_test_env();

    let stdout = run_ok(&config_path, &["ingest", "--dry-run"]);
    assert!(stdout.contains("dry-run"));
    assert!(!data_dir(&tmp).join("manifest.jsonl").exists());
    assert!(!data_dir(&tmp).join("vectors.sqlite").exists());
}

#[test]
fn test_reason_is_reproducible() {
    let (tmp, config_path) = setup_test_env();
    seed_knowledge(&tmp);

    let stdout = run_ok(&config_path, &["reason"]);
    assert!(stdout.contains("reason ok"));

    let records = data_dir(&tmp).join("reasoning/reasoning_units.jsonl");
    let index = data_dir(&tmp).join("reasoning/index.json");
    let first = (fs::read(&records).unwrap(), fs::read(&index).unwrap());
    assert!(!first.0.is_empty());

    run_ok(&config_path, &["reason"]);
    let second = (fs::read(&records).unwrap(), fs::read(&index).unwrap());
    assert_eq!(first, second);
}

#[test]
fn test_reason_rejects_zero_top_k() {
    let (tmp, config_path) = setup_test_env();
    seed_knowledge(&tmp);

    let (_, stderr, code) = run_god(&config_path, &["reason", "--top-k", "0"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("top-k"));
}

#[test]
fn test_knowledge_verify_and_normalize() {
    let (tmp, config_path) = setup_test_env();
    let dir = data_dir(&tmp).join("knowledge");
    fs::create_dir_all(&dir).unwrap();

    let lines: Vec<String> = ["ku-b", "ku-a"]
        .iter()
        .map(|id| serde_json::to_string(&ku(id, "A claim.", "d:00000")).unwrap())
        .collect();
    fs::write(dir.join("knowledge_units.jsonl"), lines.join("\n") + "\n").unwrap();

    let (_, stderr, code) = run_god(&config_path, &["knowledge", "verify"]);
    assert_eq!(code, 1, "unsorted store should fail verification");
    assert!(stderr.contains("Error"));

    let stdout = run_ok(&config_path, &["knowledge", "normalize"]);
    assert!(stdout.contains("2 records"));

    let stdout = run_ok(&config_path, &["knowledge", "verify"]);
    assert!(stdout.contains("knowledge store ok (2 records)"));
}

#[test]
fn test_dedupe_finds_identical_documents() {
    let (tmp, config_path) = setup_test_env();
    fs::write(tmp.path().join("corpus/alpha copy.md"), ALPHA).unwrap();

    run_ok(&config_path, &["ingest"]);
    let stdout = run_ok(&config_path, &["dedupe", "--json"]);
    let report = parse_json(&stdout);
    assert_eq!(issue_types(&report), vec!["duplicate_chunk"]);
    assert_eq!(report["issues"][0]["severity"], "high");

    // exhaustive comparison agrees
    let brute = parse_json(&run_ok(&config_path, &["dedupe", "--brute-force", "--json"]));
    assert_eq!(brute["issues"], report["issues"]);

    let alerts = fs::read_to_string(data_dir(&tmp).join("alerts.jsonl")).unwrap();
    assert_eq!(alerts.lines().count(), 2);
}

#[test]
fn test_dedupe_claims() {
    let (tmp, config_path) = setup_test_env();
    let store = KnowledgeStore::new(&data_dir(&tmp).join("knowledge"));
    store
        .append(&ku("ku-1", "The body, affected; increases its power.", "d:00000"))
        .unwrap();
    store
        .append(&ku("ku-2", "The body affected increases its power!", "d:00001"))
        .unwrap();

    let report = parse_json(&run_ok(&config_path, &["dedupe", "--claims", "--json"]));
    assert_eq!(issue_types(&report), vec!["duplicate_claim"]);
    assert_eq!(report["issues"][0]["subject_id"], "ku-1|ku-2");
}

#[test]
fn test_provenance_and_grounding() {
    let (tmp, config_path) = setup_test_env();
    run_ok(&config_path, &["ingest"]);
    seed_knowledge(&tmp);

    let report = parse_json(&run_ok(&config_path, &["provenance", "--json"]));
    assert_eq!(report["ok"], true);
    assert!(issue_types(&report).is_empty());

    let claims = tmp.path().join("claims.json");
    let out = tmp.path().join("grounded.json");
    fs::write(
        &claims,
        r#"{"claims": [
            {"text": "Mind is idea of body.", "type": "assertion", "supports": ["ku-001"]},
            {"text": "Made up.", "type": "assertion", "supports": ["ku-999"]}
        ]}"#,
    )
    .unwrap();

    let stdout = run_ok(
        &config_path,
        &[
            "provenance",
            "--grounding",
            claims.to_str().unwrap(),
            "--out",
            out.to_str().unwrap(),
            "--json",
        ],
    );
    let report = parse_json(&stdout);
    assert_eq!(issue_types(&report), vec!["ungrounded_claim"]);

    let grounded: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(grounded[0]["type"], "assertion");
    assert_eq!(grounded[1]["type"], "inference");
    assert_eq!(grounded[1]["supports"].as_array().unwrap().len(), 0);
}

#[test]
fn test_provenance_flags_missing_chunks_strictly() {
    let (tmp, config_path) = setup_test_env();
    run_ok(&config_path, &["ingest"]);
    let store = KnowledgeStore::new(&data_dir(&tmp).join("knowledge"));
    store
        .append(&ku("ku-x", "A claim about nothing.", "0000000000000000:00042"))
        .unwrap();

    let (stdout, _, code) = run_god(&config_path, &["provenance", "--strict", "--json"]);
    assert_eq!(code, 2);
    assert_eq!(issue_types(&parse_json(&stdout)), vec!["missing_chunk"]);
}

#[test]
fn test_immutability_append_vs_rewrite() {
    let (tmp, config_path) = setup_test_env();
    run_ok(&config_path, &["ingest"]);

    let stdout = run_ok(&config_path, &["immutability", "snapshot"]);
    assert!(stdout.contains("manifest.jsonl"));

    // a new document only appends to the manifest
    fs::write(tmp.path().join("corpus/delta.md"), "Delta is new.").unwrap();
    run_ok(&config_path, &["ingest"]);
    let report = parse_json(&run_ok(
        &config_path,
        &["immutability", "verify", "--strict", "--json"],
    ));
    assert_eq!(issue_types(&report), vec!["immutable_appended"]);

    let manifest = data_dir(&tmp).join("manifest.jsonl");
    let content = fs::read_to_string(&manifest).unwrap();
    let first_line = content.lines().next().unwrap().to_string();
    fs::write(&manifest, first_line + "\n").unwrap();

    let (stdout, _, code) = run_god(&config_path, &["immutability", "verify", "--strict", "--json"]);
    assert_eq!(code, 2);
    assert_eq!(issue_types(&parse_json(&stdout)), vec!["immutable_modified"]);
}

#[test]
fn test_immutability_verify_requires_snapshot() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, code) = run_god(&config_path, &["immutability", "verify"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("snapshot"));
}

#[test]
fn test_baseline_and_regression() {
    let (tmp, config_path) = setup_test_env();
    run_ok(&config_path, &["ingest"]);
    seed_knowledge(&tmp);
    run_ok(&config_path, &["reason"]);

    let stdout = run_ok(&config_path, &["baseline", "create", "--query", "mind"]);
    assert!(stdout.contains("baselines v1"));

    let report = parse_json(&run_ok(&config_path, &["regress", "--strict", "--json"]));
    assert!(issue_types(&report).is_empty(), "{}", report);

    // drop all but one KU and rebuild: every RU disappears
    let knowledge = data_dir(&tmp).join("knowledge");
    fs::remove_dir_all(&knowledge).unwrap();
    KnowledgeStore::new(&knowledge)
        .append(&ku("ku-003", "Joy is a passion by which the mind passes to greater perfection.", &chunk_id("beta.md", BETA)))
        .unwrap();
    run_ok(&config_path, &["reason"]);

    let (stdout, _, code) = run_god(&config_path, &["regress", "--strict", "--json"]);
    assert_eq!(code, 2);
    let types = issue_types(&parse_json(&stdout));
    assert!(types.contains(&"deleted_ru".to_string()));
    assert!(types.contains(&"ku_count_drop".to_string()));

    let stdout = run_ok(&config_path, &["baseline", "create", "--query", "mind"]);
    assert!(stdout.contains("baselines v2"));
}

#[test]
fn test_regress_without_baselines_fails() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, code) = run_god(&config_path, &["regress"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("baseline"));
}

#[test]
fn test_verify_composes_all_checks() {
    let (tmp, config_path) = setup_test_env();
    run_ok(&config_path, &["ingest"]);
    seed_knowledge(&tmp);
    run_ok(&config_path, &["reason"]);
    run_ok(&config_path, &["immutability", "snapshot"]);

    let report = parse_json(&run_ok(&config_path, &["verify", "--strict", "--json"]));
    let checks: Vec<&str> = report["checks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c.as_str().unwrap())
        .collect();
    assert_eq!(
        checks,
        vec!["closure", "provenance", "duplicate_chunks", "duplicate_claims", "immutability"]
    );
    assert_eq!(report["ok"], true);
}

#[test]
fn test_verify_reports_degenerate_reasoning_unit() {
    let (tmp, config_path) = setup_test_env();
    run_ok(&config_path, &["ingest"]);
    seed_knowledge(&tmp);
    let reasoning = data_dir(&tmp).join("reasoning");
    fs::create_dir_all(&reasoning).unwrap();
    fs::write(
        reasoning.join("reasoning_units.jsonl"),
        concat!(
            r#"{"reason_id":"r1","relation":"support","topic":"all","knowledge_ids":["ku-001"],"score":0.5,"#,
            r#""evidence":{"ngram_size":4,"shared_ngrams":1,"shared_ngram_sample":[],"markers":[]},"hash":"h"}"#,
            "\n"
        ),
    )
    .unwrap();

    let (stdout, stderr, code) = run_god(&config_path, &["verify", "--strict", "--json"]);
    assert_eq!(code, 2, "stderr: {}", stderr);
    let report = parse_json(&stdout);
    assert_eq!(issue_types(&report), vec!["degenerate_ru"]);
    assert_eq!(report["issues"][0]["subject_id"], "r1");
}

#[test]
fn test_stats() {
    let (tmp, config_path) = setup_test_env();
    run_ok(&config_path, &["ingest"]);
    seed_knowledge(&tmp);

    let stdout = run_ok(&config_path, &["stats"]);
    assert!(stdout.contains("Documents:   3 ok, 0 failed"), "{}", stdout);
    assert!(stdout.contains("Knowledge:   3"));
}

#[test]
fn test_missing_config_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, code) = run_god(&tmp.path().join("nope.toml"), &["stats"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("Failed to read config file"));
}
