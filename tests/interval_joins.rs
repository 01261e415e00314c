//! Interval engines driven from query text: position/segment joins,
//! variant joins and segment aggregation.

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

fn run(query: &str) -> Vec<String> {
    let session = Session::new(SessionConfig::new().with_workers(2)).unwrap();
    let mut out = Vec::new();
    session.run(query, &mut out).unwrap();
    String::from_utf8(out)
        .unwrap()
        .lines()
        .map(String::from)
        .collect()
}

// ============================================================================
// Position and segment joins
// ============================================================================

#[test]
fn test_positions_inside_segments() {
    let dir = TempDir::new().unwrap();
    let segs = write_file(dir.path(), "segs.gor", "Chrom\tStart\tEnd\tName\nchr1\t2\t4\tS1\n");
    let out = run(&format!(
        "gorrows -p chr1:0-10 | join -snpseg -r {}",
        segs.display()
    ));
    assert_eq!(out, vec!["chrom\tpos\tName", "chr1\t3\tS1", "chr1\t4\tS1"]);
}

#[test]
fn test_inclusive_join_emits_left_rows_once() {
    let dir = TempDir::new().unwrap();
    let segs = write_file(
        dir.path(),
        "segs.gor",
        "Chrom\tStart\tEnd\tName\nchr1\t2\t4\tS1\nchr1\t3\t6\tS2\n",
    );
    let out = run(&format!("gorrows -p chr1:0-10 | join -snpseg -i {}", segs.display()));
    assert_eq!(
        out,
        vec!["chrom\tpos", "chr1\t3", "chr1\t4", "chr1\t5", "chr1\t6"]
    );
}

#[test]
fn test_join_against_nested_query() {
    let out = run("gorrows -p chr1:0-6 | join -snpsnp -i <(gorrows -p chr1:3-20 -step 2)");
    assert_eq!(out, vec!["chrom\tpos", "chr1\t3", "chr1\t5"]);
}

#[test]
fn test_spanned_segments_give_same_right_rows() {
    let dir = TempDir::new().unwrap();
    let segs = write_file(
        dir.path(),
        "segs.gor",
        "Chrom\tbpStart\tbpStop\nchr1\t1\t10\nchr1\t5\t20\nchr1\t30\t40\n",
    );
    let snps = write_file(
        dir.path(),
        "snps.gor",
        "Chrom\tPos\tR\nchr1\t3\ta\nchr1\t12\tb\nchr1\t25\tc\n",
    );
    let direct = run(&format!(
        "gor {} | join -segsnp -ir {}",
        segs.display(),
        snps.display()
    ));
    let spanned = run(&format!(
        "gor {} | segspan | join -segsnp -ir {}",
        segs.display(),
        snps.display()
    ));
    assert_eq!(direct, spanned);
    assert_eq!(direct[1..], ["chr1\t3\ta", "chr1\t12\tb"]);
}

#[test]
fn test_unsorted_right_side_is_data_error() {
    let dir = TempDir::new().unwrap();
    let segs = write_file(
        dir.path(),
        "segs.gor",
        "Chrom\tStart\tEnd\nchr1\t9\t12\nchr1\t3\t5\n",
    );
    let session = Session::new(SessionConfig::new()).unwrap();
    let mut out = Vec::new();
    let err = session
        .run(
            &format!("gorrows -p chr1:0-20 | join -snpseg {}", segs.display()),
            &mut out,
        )
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Data);
}

#[test]
fn test_overlap_count_matches_outer_join_sum() {
    let dir = TempDir::new().unwrap();
    let genes = write_file(
        dir.path(),
        "genes.gor",
        "Chrom\tgene_start\tgene_end\tGene\n\
         chr1\t0\t100\tG1\n\
         chr1\t50\t150\tG2\n\
         chr1\t300\t400\tG3\n\
         chr2\t10\t20\tG4\n",
    );
    let snps = write_file(
        dir.path(),
        "snps.gor",
        "Chrom\tPos\tEnd\tId\n\
         chr1\t10\t11\ts1\n\
         chr1\t60\t61\ts2\n\
         chr1\t120\t121\ts3\n\
         chr1\t140\t141\ts4\n\
         chr2\t500\t501\ts5\n",
    );
    let counted = run(&format!(
        "gor {} | join -segseg -ic {} | group chrom -gc Gene -sum -ic OverlapCount \
         | rename sum_OverlapCount hits",
        genes.display(),
        snps.display()
    ));
    let outer = run(&format!(
        "gor {} | join -segseg -l -e none {} | calc hit if(Id = 'none', 0, 1) \
         | group chrom -gc Gene -sum -ic hit | rename sum_hit hits",
        genes.display(),
        snps.display()
    ));
    assert_eq!(counted, outer);

    let mut hits: Vec<(String, String)> = counted[1..]
        .iter()
        .map(|l| {
            let cells: Vec<&str> = l.split('\t').collect();
            (cells[3].to_string(), cells[4].to_string())
        })
        .collect();
    hits.sort();
    let expected: Vec<(String, String)> = [("G1", "2"), ("G2", "3"), ("G3", "0"), ("G4", "0")]
        .iter()
        .map(|(g, n)| (g.to_string(), n.to_string()))
        .collect();
    assert_eq!(hits, expected);
}

// ============================================================================
// Variant joins
// ============================================================================

#[test]
fn test_varjoin_matches_alleles_case_insensitively() {
    let dir = TempDir::new().unwrap();
    let left = write_file(
        dir.path(),
        "left.gor",
        "Chrom\tPos\tRef\tAlt\tL\nchr1\t10\tA\tC\tl1\nchr1\t20\tG\tT\tl2\n",
    );
    let right = write_file(
        dir.path(),
        "right.gor",
        "Chrom\tPos\tRef\tAlt\tR\nchr1\t10\ta\tc\tr1\nchr1\t20\tG\tA\tr2\n",
    );
    let out = run(&format!("gor {} | varjoin -r {}", left.display(), right.display()));
    assert_eq!(out[1..], ["chr1\t10\tA\tC\tl1\tr1"]);
}

// ============================================================================
// Segment aggregation
// ============================================================================

#[test]
fn test_segspan_merges_overlaps() {
    let dir = TempDir::new().unwrap();
    let segs = write_file(
        dir.path(),
        "segs.gor",
        "Chrom\tbpStart\tbpStop\nchr1\t1\t10\nchr1\t5\t20\nchr1\t30\t40\n",
    );
    let out = run(&format!("gor {} | segspan", segs.display()));
    assert_eq!(out[1..], ["chr1\t1\t20\t2", "chr1\t30\t40\t1"]);
}

#[test]
fn test_segproj_then_seghist() {
    let dir = TempDir::new().unwrap();
    let segs = write_file(
        dir.path(),
        "segs.gor",
        "Chrom\tbpStart\tbpStop\nchr1\t0\t10\nchr1\t5\t20\n",
    );
    let out = run(&format!("gor {} | segproj", segs.display()));
    assert_eq!(
        out[1..],
        ["chr1\t0\t5\t1", "chr1\t5\t10\t2", "chr1\t10\t20\t1"]
    );
    let out = run(&format!("gor {} | segproj | seghist 3", segs.display()));
    assert_eq!(out[1..], ["chr1\t0\t10\t3", "chr1\t10\t20\t1"]);
}
