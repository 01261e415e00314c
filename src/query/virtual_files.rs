//! Binding table for `create` statements.
//!
//! A virtual file `[name]` is bound once to the query that produces it and
//! later resolved to the path of the materialized result. References
//! between bindings form a graph that is checked for cycles before any
//! query runs.

use crate::gor::{GorError, Result};
use regex::Regex;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// State of one virtual file.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Unresolved { query: String },
    Resolved { query: String, path: PathBuf },
}

impl Binding {
    pub fn query(&self) -> &str {
        match self {
            Binding::Unresolved { query } | Binding::Resolved { query, .. } => query,
        }
    }
}

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[([^\[\]\s]+)\]").expect("valid pattern"))
}

/// Virtual file bindings of one query execution.
#[derive(Debug)]
pub struct VirtualFileManager {
    bindings: FxHashMap<String, Binding>,
    names: Vec<String>,
    max_depth: usize,
}

impl VirtualFileManager {
    pub fn new(max_depth: usize) -> Self {
        Self {
            bindings: FxHashMap::default(),
            names: Vec::new(),
            max_depth,
        }
    }

    /// Bind `name` to `query`.
    ///
    /// Binding the same name twice to the same query is allowed; binding it
    /// to a different query or to a query that references the name itself
    /// is a parse error.
    pub fn add(&mut self, name: &str, query: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GorError::parse("create", "Virtual file name is empty"));
        }
        let key = name.to_lowercase();
        let query = query.trim();
        if self.references(query).contains(&key) {
            return Err(GorError::parse(
                "create",
                format!("Virtual file [{}] references itself", name),
            ));
        }
        if let Some(existing) = self.bindings.get(&key) {
            if existing.query() == query {
                return Ok(());
            }
            return Err(GorError::parse(
                "create",
                format!("Virtual file [{}] is already defined", name),
            ));
        }
        self.bindings.insert(
            key.clone(),
            Binding::Unresolved {
                query: query.to_string(),
            },
        );
        self.names.push(key);
        Ok(())
    }

    /// Names in definition order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(&name.to_lowercase())
    }

    pub fn path(&self, name: &str) -> Option<&Path> {
        match self.get(name)? {
            Binding::Resolved { path, .. } => Some(path),
            Binding::Unresolved { .. } => None,
        }
    }

    /// Record the materialized result of `name`.
    pub fn resolve(&mut self, name: &str, path: PathBuf) -> Result<()> {
        let key = name.to_lowercase();
        let binding = self.bindings.get_mut(&key).ok_or_else(|| {
            GorError::system(format!("Virtual file [{}] is not defined", name))
        })?;
        let query = binding.query().to_string();
        *binding = Binding::Resolved { query, path };
        Ok(())
    }

    /// Lowercased `[name]` references in `text`, in order of appearance.
    fn references(&self, text: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for cap in reference_pattern().captures_iter(text) {
            let name = cap[1].to_lowercase();
            if !out.contains(&name) {
                out.push(name);
            }
        }
        out
    }

    /// Bound virtual files referenced by `text`.
    pub fn dependencies(&self, text: &str) -> Vec<String> {
        self.references(text)
            .into_iter()
            .filter(|n| self.bindings.contains_key(n))
            .collect()
    }

    /// Reject cyclic or too deeply nested bindings.
    pub fn check_cycles(&self) -> Result<()> {
        for name in &self.names {
            let mut path = vec![name.clone()];
            self.walk(name, &mut path)?;
        }
        Ok(())
    }

    fn walk(&self, name: &str, path: &mut Vec<String>) -> Result<()> {
        if path.len() > self.max_depth {
            return Err(GorError::parse(
                "create",
                format!(
                    "Virtual files nested deeper than {}: {}",
                    self.max_depth,
                    path.join(" -> ")
                ),
            ));
        }
        let Some(binding) = self.bindings.get(name) else {
            return Ok(());
        };
        for dep in self.dependencies(binding.query()) {
            if path.contains(&dep) {
                path.push(dep);
                return Err(GorError::parse(
                    "create",
                    format!("Cyclic virtual file definition: {}", path.join(" -> ")),
                ));
            }
            path.push(dep.clone());
            self.walk(&dep, path)?;
            path.pop();
        }
        Ok(())
    }

    /// Unresolved bindings grouped so every group only depends on earlier
    /// groups or resolved bindings.
    pub fn levels(&self) -> Result<Vec<Vec<String>>> {
        self.check_cycles()?;
        let mut done: Vec<String> = self
            .names
            .iter()
            .filter(|n| matches!(self.bindings.get(*n), Some(Binding::Resolved { .. })))
            .cloned()
            .collect();
        let mut pending: Vec<String> = self
            .names
            .iter()
            .filter(|n| !done.contains(n))
            .cloned()
            .collect();
        let mut levels = Vec::new();
        while !pending.is_empty() {
            let (ready, rest): (Vec<String>, Vec<String>) = pending.into_iter().partition(|n| {
                self.bindings
                    .get(n)
                    .map(|b| self.dependencies(b.query()).iter().all(|d| done.contains(d)))
                    .unwrap_or(true)
            });
            if ready.is_empty() {
                return Err(GorError::parse("create", "Unresolvable virtual file graph"));
            }
            done.extend(ready.iter().cloned());
            levels.push(ready);
            pending = rest;
        }
        Ok(levels)
    }

    /// Replace every bound `[name]` with the path of its result.
    pub fn replace_virtual_files(&self, text: &str) -> Result<String> {
        let mut missing: Option<String> = None;
        let replaced = reference_pattern().replace_all(text, |cap: &regex::Captures| {
            let name = cap[1].to_lowercase();
            match self.bindings.get(&name) {
                Some(Binding::Resolved { path, .. }) => path.display().to_string(),
                Some(Binding::Unresolved { .. }) => {
                    missing.get_or_insert(cap[1].to_string());
                    cap[0].to_string()
                }
                None => cap[0].to_string(),
            }
        });
        if let Some(name) = missing {
            return Err(GorError::system(format!(
                "Virtual file [{}] has not been materialized",
                name
            )));
        }
        Ok(replaced.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gor::ErrorCategory;

    #[test]
    fn test_add_and_resolve() {
        let mut vfm = VirtualFileManager::new(8);
        vfm.add("a", "gor x.gor").unwrap();
        vfm.add("B", "gor [a] | top 1").unwrap();
        assert_eq!(vfm.dependencies("gor [b] [a] [zz]"), vec!["b", "a"]);
        assert_eq!(vfm.levels().unwrap(), vec![vec!["a".to_string()], vec!["b".to_string()]]);

        vfm.resolve("a", PathBuf::from("/cache/1.gor")).unwrap();
        assert_eq!(
            vfm.replace_virtual_files("gor [A] | top 1").unwrap(),
            "gor /cache/1.gor | top 1"
        );
        assert_eq!(vfm.levels().unwrap(), vec![vec!["b".to_string()]]);
    }

    #[test]
    fn test_unresolved_reference_is_error() {
        let mut vfm = VirtualFileManager::new(8);
        vfm.add("a", "gor x.gor").unwrap();
        assert!(vfm.replace_virtual_files("gor [a]").is_err());
        assert_eq!(vfm.replace_virtual_files("gor [other]").unwrap(), "gor [other]");
    }

    #[test]
    fn test_self_reference_rejected() {
        let mut vfm = VirtualFileManager::new(8);
        let err = vfm.add("a", "gor [a]").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Parsing);
    }

    #[test]
    fn test_rebinding() {
        let mut vfm = VirtualFileManager::new(8);
        vfm.add("a", "gor x.gor").unwrap();
        vfm.add("a", "gor x.gor").unwrap();
        assert!(vfm.add("a", "gor y.gor").is_err());
        assert!(vfm.add(" ", "gor y.gor").is_err());
    }

    #[test]
    fn test_cycle_detected() {
        let mut vfm = VirtualFileManager::new(8);
        vfm.add("a", "gor [b]").unwrap();
        vfm.add("b", "gor [a]").unwrap();
        let err = vfm.check_cycles().unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Parsing);
    }

    #[test]
    fn test_depth_limit() {
        let mut vfm = VirtualFileManager::new(2);
        vfm.add("a", "gor [b]").unwrap();
        vfm.add("b", "gor [c]").unwrap();
        vfm.add("c", "gor [d]").unwrap();
        vfm.add("d", "gor x.gor").unwrap();
        assert!(vfm.check_cycles().is_err());
    }
}
