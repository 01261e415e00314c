//! Command-line tests for the `gorpipe` binary.
//!
//! Checks output and the exit status for each error category.

use std::io::Write;
use std::process::{Command, Output};
use tempfile::NamedTempFile;

// ============================================================================
// Helper functions
// ============================================================================

fn create_gor_file(content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".gor").tempfile().unwrap();
    write!(file, "{}", content).unwrap();
    file.flush().unwrap();
    file
}

fn run_gorpipe(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gorpipe"))
        .args(args)
        .env_remove("GORPIPE_CACHE_DIR")
        .env_remove("GORPIPE_ALLOWED_COMMANDS")
        .env_remove("GORPIPE_GENOME")
        .output()
        .expect("Failed to execute gorpipe")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

// ============================================================================
// query
// ============================================================================

#[test]
fn test_query_to_stdout() {
    let output = run_gorpipe(&["query", "gorrows -p chr1:0-3 | calc x pos * 2"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(
        stdout(&output),
        "chrom\tpos\tx\nchr1\t0\t0\nchr1\t1\t2\nchr1\t2\t4\n"
    );
}

#[test]
fn test_query_from_file_to_output() {
    let data = create_gor_file("Chrom\tPos\tGene\nchr1\t5\tA\nchr1\t9\tB\n");
    let mut query = NamedTempFile::new().unwrap();
    write!(query, "gor {} | where Gene = 'B'", data.path().display()).unwrap();
    query.flush().unwrap();
    let out = NamedTempFile::new().unwrap();

    let output = run_gorpipe(&[
        "query",
        "-f",
        query.path().to_str().unwrap(),
        "-o",
        out.path().to_str().unwrap(),
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(
        std::fs::read_to_string(out.path()).unwrap(),
        "Chrom\tPos\tGene\nchr1\t9\tB\n"
    );
}

#[test]
fn test_parallel_threads_flag() {
    let output = run_gorpipe(&["--threads", "2", "query", "pgor <(gorrows -p chr2:0-4)"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).lines().count(), 5);
}

// ============================================================================
// verify and signature
// ============================================================================

#[test]
fn test_verify_sorted_file() {
    let data = create_gor_file("Chrom\tPos\nchr1\t1\nchr1\t5\nchr2\t1\n");
    let output = run_gorpipe(&["verify", data.path().to_str().unwrap()]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("3 rows in order"));
}

#[test]
fn test_verify_unsorted_file_is_data_error() {
    let data = create_gor_file("Chrom\tPos\nchr2\t1\nchr1\t5\n");
    let output = run_gorpipe(&["verify", data.path().to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(3));
    assert!(stderr(&output).starts_with("Error:"));
}

#[test]
fn test_signature_is_hex_digest() {
    let output = run_gorpipe(&["signature", "gorrows -p chr1:0-10"]);
    assert!(output.status.success());
    let text = stdout(&output);
    let digest = text.trim();
    assert_eq!(digest.len(), 64);
    assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
}

// ============================================================================
// Exit codes
// ============================================================================

#[test]
fn test_unknown_command_exits_with_parse_code() {
    let output = run_gorpipe(&["query", "gorrows -p chr1:0-3 | nosuchcommand"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("NOSUCHCOMMAND"));
}

#[test]
fn test_cmd_without_allow_list_exits_with_security_code() {
    let output = run_gorpipe(&["query", "cmd {echo hello}"]);
    assert_eq!(output.status.code(), Some(5));
}

#[test]
fn test_missing_cache_dir_exits_with_system_code() {
    let dir = tempfile::TempDir::new().unwrap();
    let missing = dir.path().join("absent");
    let output = run_gorpipe(&[
        "--cache-dir",
        missing.to_str().unwrap(),
        "query",
        "gorrows -p chr1:0-3",
    ]);
    assert_eq!(output.status.code(), Some(4));
}
