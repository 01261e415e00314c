//! Cache signatures of sub-queries.
//!
//! A signature is a SHA-256 digest over the normalized query text, the
//! signatures of the virtual files it reads, the modification times of the
//! files it names and, with `signature -timeres N`, the current time
//! truncated to an N millisecond bucket. Queries that cannot be reproduced
//! from their text get a random nonce instead, so they never hit the cache.

use super::cache::modified;
use super::parser::{split_pipes, tokenize, CommandLine};
use super::{is_dictionary, template_call};
use crate::dictionary::Dictionary;
use crate::gor::Result;
use log::debug;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Settings collected from the `signature` commands of a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignatureOptions {
    pub timeres: Option<u64>,
    pub files: Vec<PathBuf>,
}

/// Read the `signature` commands of a pipeline.
pub fn signature_options(query: &str) -> Result<SignatureOptions> {
    let mut options = SignatureOptions::default();
    for pipe in split_pipes(query)? {
        let line = CommandLine::parse(&pipe)?;
        if line.name() != "signature" {
            continue;
        }
        let opts = line.options(&[], &["-timeres", "-file"])?;
        if let Some(n) = opts.int("-timeres")? {
            if n < 0 {
                return Err(opts.option_error("-timeres", "Time resolution must not be negative"));
            }
            options.timeres = Some(n as u64);
        }
        if let Some(file) = opts.value("-file") {
            options.files.push(PathBuf::from(file));
        }
    }
    Ok(options)
}

/// Whitespace-normalized query text.
pub fn normalize(query: &str) -> String {
    match split_pipes(query) {
        Ok(pipes) => pipes
            .iter()
            .map(|p| tokenize(p).join(" "))
            .collect::<Vec<_>>()
            .join(" | "),
        Err(_) => tokenize(query).join(" "),
    }
}

/// Query text with the inside of quoted literals blanked out.
fn without_literals(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut quote: Option<char> = None;
    for c in query.chars() {
        match quote {
            Some(q) if c == q => {
                quote = None;
                out.push(c);
            }
            Some(_) => out.push(' '),
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                }
                out.push(c);
            }
        }
    }
    out
}

/// Whether the query invokes a session template outside a quoted literal.
pub fn uses_template(query: &str) -> bool {
    template_call().is_match(&without_literals(query))
}

/// Entry and bucket files of a dictionary. Rewriting an entry does not
/// touch the dictionary file, so they are signed separately.
fn dictionary_files(path: &Path) -> Vec<PathBuf> {
    match Dictionary::load(path) {
        Ok(dict) => dict
            .entries()
            .iter()
            .flat_map(|e| std::iter::once(e.path.clone()).chain(e.bucket.clone()))
            .collect(),
        Err(e) => {
            debug!("Not signing entries of {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Existing files named anywhere in the query text, followed by the files
/// of the dictionaries among them.
fn referenced_files(query: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    let separators = |c: char| c.is_whitespace() || "()<>{}'\"|,;".contains(c);
    for word in query.split(separators) {
        if word.is_empty() || word == "." || word == ".." || word.starts_with('-') {
            continue;
        }
        let path = PathBuf::from(word);
        if path.exists() && !files.contains(&path) {
            files.push(path);
        }
    }
    let dictionaries: Vec<PathBuf> = files.iter().filter(|p| is_dictionary(p)).cloned().collect();
    for dict in dictionaries {
        for entry in dictionary_files(&dict) {
            if !files.contains(&entry) {
                files.push(entry);
            }
        }
    }
    files
}

fn mtime_nanos(path: &Path) -> u128 {
    modified(path)
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

fn now_millis(now: SystemTime) -> u128 {
    now.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Signature of `query` given the signatures of its dependencies.
pub fn compute(query: &str, dependencies: &[String], now: SystemTime) -> Result<String> {
    let options = signature_options(query)?;
    let mut hasher = Sha256::new();
    hasher.update(normalize(query).as_bytes());
    for dep in dependencies {
        hasher.update(b"\0dep:");
        hasher.update(dep.as_bytes());
    }
    let mut files = referenced_files(query);
    for file in options.files.iter() {
        if !files.contains(file) {
            files.push(file.clone());
        }
    }
    for file in &files {
        hasher.update(b"\0file:");
        hasher.update(file.display().to_string().as_bytes());
        hasher.update(mtime_nanos(file).to_le_bytes());
    }
    let nonce = match options.timeres {
        _ if uses_template(query) => true,
        Some(0) => true,
        Some(n) => {
            let bucket = now_millis(now) / n as u128 * n as u128;
            hasher.update(b"\0time:");
            hasher.update(bucket.to_le_bytes());
            false
        }
        None => false,
    };
    if nonce {
        let mut rng = SmallRng::from_entropy();
        hasher.update(b"\0nonce:");
        hasher.update(rng.gen::<u64>().to_le_bytes());
        hasher.update(now_millis(now).to_le_bytes());
    }
    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    const DAY_MS: u64 = 86_400_000;

    fn at(ms: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(ms)
    }

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize("gor   a.gor|  where x  =  1"),
            "gor a.gor | where x = 1"
        );
    }

    #[test]
    fn test_whitespace_does_not_change_signature() {
        let a = compute("gorrows -p chr1:1-5 |top 2", &[], at(0)).unwrap();
        let b = compute("gorrows  -p chr1:1-5 | top 2", &[], at(0)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_timeres_buckets() {
        let q = "gorrow chr1,1 | signature -timeres 86400000";
        let a = compute(q, &[], at(DAY_MS * 3 + 5)).unwrap();
        let b = compute(q, &[], at(DAY_MS * 3 + 5000)).unwrap();
        let c = compute(q, &[], at(DAY_MS * 4 + 1)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_zero_timeres_is_never_reused() {
        let q = "gorrow chr1,1 | signature -timeres 0";
        assert_ne!(compute(q, &[], at(1)).unwrap(), compute(q, &[], at(1)).unwrap());
    }

    #[test]
    fn test_template_is_never_reused() {
        let q = "@genes(chr1)";
        assert!(uses_template(q));
        assert!(uses_template("gor <(@genes('chr1')) | top 1"));
        assert_ne!(compute(q, &[], at(1)).unwrap(), compute(q, &[], at(1)).unwrap());
    }

    #[test]
    fn test_at_sign_in_literal_is_not_a_template() {
        for q in [
            "gorrow chr1,1 | calc x 'a@b'",
            "gorrow chr1,1 | where \"x\" != \"@fn(1)\"",
            "gorrow chr1,1 | calc mail 'me@host'",
        ] {
            assert!(!uses_template(q), "{}", q);
            assert_eq!(compute(q, &[], at(1)).unwrap(), compute(q, &[], at(1)).unwrap());
        }
    }

    #[test]
    fn test_dictionary_entry_change_changes_signature() {
        let dir = TempDir::new().unwrap();
        let entry = dir.path().join("a.gor");
        fs::write(&entry, "Chrom\tPos\nchr1\t1\n").unwrap();
        let dict = dir.path().join("d.gord");
        fs::write(&dict, "a.gor\tA\n").unwrap();
        let q = format!("gor {}", dict.display());
        let a = compute(&q, &[], at(0)).unwrap();
        assert_eq!(a, compute(&q, &[], at(0)).unwrap());
        let f = fs::File::options().write(true).open(&entry).unwrap();
        f.set_modified(SystemTime::now() + Duration::from_secs(10)).unwrap();
        assert_ne!(a, compute(&q, &[], at(0)).unwrap());
    }

    #[test]
    fn test_dependencies_change_signature() {
        let a = compute("gor x", &["1".to_string()], at(0)).unwrap();
        let b = compute("gor x", &["2".to_string()], at(0)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_file_change_changes_signature() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.gor");
        fs::write(&path, "Chrom\tPos\n").unwrap();
        let q = format!("gor {}", path.display());
        let a = compute(&q, &[], at(0)).unwrap();
        let f = fs::File::options().write(true).open(&path).unwrap();
        f.set_modified(SystemTime::now() + Duration::from_secs(10)).unwrap();
        let b = compute(&q, &[], at(0)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_signature_options() {
        let opts = signature_options("gor a | signature -timeres 10 -file b.txt").unwrap();
        assert_eq!(opts.timeres, Some(10));
        assert_eq!(opts.files, vec![PathBuf::from("b.txt")]);
        assert!(signature_options("gor a | signature -x").is_err());
    }
}
