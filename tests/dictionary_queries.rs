//! Dictionary (`.gord`) queries: tag filters, source columns and ranges.

use std::fs;
use std::path::{Path, PathBuf};

use gor_pipe::config::SessionConfig;
use gor_pipe::{ErrorCategory, Session};
use tempfile::TempDir;

// ============================================================================
// Helper functions
// ============================================================================

fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

/// Three sample files and a dictionary over them.
fn sample_dictionary(dir: &Path) -> PathBuf {
    write_file(dir, "a.gor", "Chrom\tPos\tV\nchr1\t1\ta\nchr1\t10\ta\nchr2\t5\ta\n");
    write_file(dir, "b.gor", "Chrom\tPos\tV\nchr1\t5\tb\n");
    write_file(dir, "c.gor", "Chrom\tPos\tV\nchr2\t1\tc\n");
    write_file(
        dir,
        "samples.gord",
        "a.gor\tA\tchr1\t1\tchr2\t5\nb.gor\tB\tchr1\t5\tchr1\t5\nc.gor\tC\tchr2\t1\tchr2\t1\n",
    )
}

fn run(query: &str) -> String {
    let session = Session::new(SessionConfig::new().with_workers(2)).unwrap();
    let mut out = Vec::new();
    session.run(query, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

fn column(text: &str, idx: usize) -> Vec<String> {
    text.lines()
        .skip(1)
        .map(|l| l.split('\t').nth(idx).unwrap_or("").to_string())
        .collect()
}

// ============================================================================
// Tag filtering
// ============================================================================

#[test]
fn test_all_files_merged_in_order() {
    let dir = TempDir::new().unwrap();
    let dict = sample_dictionary(dir.path());
    let out = run(&format!("gor {}", dict.display()));
    assert_eq!(column(&out, 2), vec!["a", "b", "a", "c", "a"]);
}

#[test]
fn test_tag_filter_with_source_column() {
    let dir = TempDir::new().unwrap();
    let dict = sample_dictionary(dir.path());
    let out = run(&format!("gor -f B,C -s PN {}", dict.display()));
    assert_eq!(out.lines().next(), Some("Chrom\tPos\tV\tPN"));
    assert_eq!(column(&out, 3), vec!["B", "C"]);
}

#[test]
fn test_tag_file() {
    let dir = TempDir::new().unwrap();
    let dict = sample_dictionary(dir.path());
    let tags = write_file(dir.path(), "tags.txt", "C\n");
    let out = run(&format!("gor -ff {} {}", tags.display(), dict.display()));
    assert_eq!(column(&out, 2), vec!["c"]);
}

#[test]
fn test_unknown_tag_fails_unless_silent() {
    let dir = TempDir::new().unwrap();
    let dict = sample_dictionary(dir.path());
    let session = Session::new(SessionConfig::new()).unwrap();
    let mut out = Vec::new();
    let err = session
        .run(&format!("gor -f Z {}", dict.display()), &mut out)
        .unwrap_err();
    assert_ne!(err.category(), ErrorCategory::Security);

    let out = run(&format!("gor -fs -f Z,B {}", dict.display()));
    assert_eq!(column(&out, 2), vec!["b"]);
}

// ============================================================================
// Ranges
// ============================================================================

#[test]
fn test_range_skips_unrelated_files() {
    let dir = TempDir::new().unwrap();
    let dict = sample_dictionary(dir.path());
    let out = run(&format!("gor -p chr2 {}", dict.display()));
    assert_eq!(column(&out, 2), vec!["c", "a"]);
}

#[test]
fn test_join_against_dictionary() {
    let dir = TempDir::new().unwrap();
    let dict = sample_dictionary(dir.path());
    let left = write_file(dir.path(), "left.gor", "Chrom\tPos\tL\nchr1\t5\tx\nchr2\t1\ty\n");
    let out = run(&format!(
        "gor {} | join -snpsnp {}",
        left.display(),
        dict.display()
    ));
    assert_eq!(
        out.lines().collect::<Vec<_>>(),
        vec!["Chrom\tPos\tL\tV", "chr1\t5\tx\tb", "chr2\t1\ty\tc"]
    );
}

// ============================================================================
// NOR dictionaries
// ============================================================================

fn sample_nor_dictionary(dir: &Path) -> PathBuf {
    write_file(dir, "p1.tsv", "name\tval\nP1\t1\n");
    write_file(dir, "p2.tsv", "name\tval\nP2\t2\nP2b\t3\n");
    write_file(dir, "patients.nord", "p1.tsv\tT1\np2.tsv\tT2\n")
}

#[test]
fn test_nor_dictionary_tag_filter() {
    let dir = TempDir::new().unwrap();
    let dict = sample_nor_dictionary(dir.path());
    let out = run(&format!("nor {} -f T2", dict.display()));
    assert_eq!(out, "name\tval\nP2\t2\nP2b\t3\n");
}

#[test]
fn test_nor_dictionary_source_column() {
    let dir = TempDir::new().unwrap();
    let dict = sample_nor_dictionary(dir.path());
    let out = run(&format!("nor -f T1,T2 -s PN {}", dict.display()));
    assert_eq!(
        out.lines().collect::<Vec<_>>(),
        vec!["name\tval\tPN", "P1\t1\tT1", "P2\t2\tT2", "P2b\t3\tT2"]
    );
}

#[test]
fn test_nor_declared_header_for_missing_file() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.tsv");
    let out = run(&format!("nor -dh a,b {}", missing.display()));
    assert_eq!(out, "a\tb\n");

    let session = Session::new(SessionConfig::new()).unwrap();
    let err = session
        .execute(&format!("nor {}", missing.display()))
        .err()
        .unwrap();
    assert_eq!(err.category(), ErrorCategory::Data);
}
