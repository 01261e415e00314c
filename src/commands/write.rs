//! `write [-d] [-p] [-c] [-card cols] [-tag T] path`.
//!
//! Rows are written to a temporary file next to the target and moved into
//! place when the stream ends, together with a `.meta` sidecar. With `-d`
//! (or a target ending in `.gord`) the target is a dictionary folder: each
//! writer adds one `part_<hex>.gor` file and appends its entry to the
//! folder's `thedict.gord`. `-p` passes rows on after writing them.

use super::{resolve_columns, Emitter, Step};
use crate::dictionary::{DictionaryCache, DictionaryEntry, FOLDER_DICTIONARY_NAME};
use crate::gor::{GorError, Result};
use crate::query::parser::CommandLine;
use crate::query::Session;
use crate::row::{Header, Row};
use crate::streaming::buffers::PART_OUTPUT_BUFFER;
use crate::streaming::{GorWriter, MetaBuilder, MetaInfo};
use log::{debug, info};
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Where written rows end up.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteTarget {
    File(PathBuf),
    Folder(PathBuf),
}

/// Parsed `write` options.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub target: WriteTarget,
    pub pass_through: bool,
    pub schema: bool,
    pub card_columns: Vec<(String, usize)>,
    pub tag: Option<String>,
}

struct OpenFile {
    writer: GorWriter<NamedTempFile>,
    meta: MetaBuilder,
    path: PathBuf,
}

pub struct WriteStep {
    header: Header,
    options: WriteOptions,
    file: Option<OpenFile>,
    folder_lock: Arc<Mutex<()>>,
    dictionaries: Arc<DictionaryCache>,
    done: bool,
}

impl WriteStep {
    pub fn from_command(line: &CommandLine, input: &Header, session: &Session) -> Result<Self> {
        let opts = line.options(&["-d", "-p", "-c"], &["-card", "-tag"])?;
        let [path] = opts.positional() else {
            return Err(opts.error("Expected one output path"));
        };
        let path = PathBuf::from(path);
        let folder = opts.has("-d")
            || path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("gord"));
        let card_columns = match opts.value("-card") {
            Some(spec) => resolve_columns(input, spec, line.name())?
                .into_iter()
                .map(|i| (input.name(i).to_string(), i))
                .collect(),
            None => Vec::new(),
        };
        let options = WriteOptions {
            target: if folder {
                WriteTarget::Folder(path)
            } else {
                WriteTarget::File(path)
            },
            pass_through: opts.has("-p"),
            schema: opts.has("-c"),
            card_columns,
            tag: opts.value("-tag").map(String::from),
        };
        Ok(Self::new(
            input,
            options,
            session.write_lock(),
            session.dictionaries(),
        ))
    }

    pub fn new(
        input: &Header,
        options: WriteOptions,
        folder_lock: Arc<Mutex<()>>,
        dictionaries: Arc<DictionaryCache>,
    ) -> Self {
        Self {
            header: input.clone(),
            options,
            file: None,
            folder_lock,
            dictionaries,
            done: false,
        }
    }

    fn data_path(&self) -> Result<PathBuf> {
        match &self.options.target {
            WriteTarget::File(path) => Ok(path.clone()),
            WriteTarget::Folder(dir) => {
                fs::create_dir_all(dir).map_err(|e| {
                    GorError::system(format!("Cannot create folder {}: {}", dir.display(), e))
                })?;
                let mut rng = SmallRng::from_entropy();
                Ok(dir.join(format!("part_{:016x}.gor", rng.gen::<u64>())))
            }
        }
    }

    fn open(&mut self) -> Result<&mut OpenFile> {
        if self.file.is_none() {
            let path = self.data_path()?;
            let dir = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let tmp = NamedTempFile::new_in(&dir).map_err(|e| {
                GorError::system(format!("Cannot write to {}: {}", dir.display(), e))
            })?;
            let mut writer = GorWriter::with_capacity(PART_OUTPUT_BUFFER, tmp);
            writer.write_header(&self.header)?;
            debug!("Writing {}", path.display());
            self.file = Some(OpenFile {
                writer,
                meta: MetaBuilder::new(self.options.card_columns.clone()),
                path,
            });
        }
        self.file
            .as_mut()
            .ok_or_else(|| GorError::system("write target is not open"))
    }

    fn line_of(&self, row: &Row) -> String {
        if self.header.is_nor() {
            row.cols()[2.min(row.len())..].join("\t")
        } else {
            row.to_line()
        }
    }

    fn commit(&mut self) -> Result<()> {
        self.open()?;
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        let rows = file.writer.rows_written();
        let tmp = file.writer.into_inner()?;
        tmp.persist(&file.path).map_err(|e| {
            GorError::system(format!("Cannot store {}: {}", file.path.display(), e.error))
        })?;
        let mut meta = file.meta.finish();
        if self.header.is_nor() {
            meta.range = None;
        }
        if self.options.schema {
            meta.schema = Some(
                self.header
                    .types()
                    .iter()
                    .skip(if self.header.is_nor() { 2 } else { 0 })
                    .map(|t| t.code().to_string())
                    .collect(),
            );
        }
        meta.tags = self.options.tag.clone();
        meta.write(&file.path)?;
        if let WriteTarget::Folder(dir) = &self.options.target {
            self.append_entry(dir, &file.path, &meta)?;
        }
        info!("Wrote {} rows to {}", rows, file.path.display());
        Ok(())
    }

    /// Add the written part to the folder dictionary.
    fn append_entry(&self, dir: &Path, part: &Path, meta: &MetaInfo) -> Result<()> {
        let alias = match &self.options.tag {
            Some(tag) => tag.clone(),
            None => part
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default(),
        };
        let entry = DictionaryEntry {
            path: part.to_path_buf(),
            tags: vec![alias.clone()],
            alias,
            range: meta.range.clone(),
            bucket: None,
            deleted: false,
        };
        let dict_path = dir.join(FOLDER_DICTIONARY_NAME);
        let _guard = self.folder_lock.lock();
        let fresh = !dict_path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&dict_path)?;
        let mut text = String::new();
        if fresh {
            text.push('#');
            text.push_str(&self.header.to_line());
            text.push('\n');
        }
        text.push_str(&entry.to_line(dir));
        text.push('\n');
        file.write_all(text.as_bytes())?;
        file.flush()?;
        self.dictionaries.invalidate(&dict_path);
        Ok(())
    }
}

impl Step for WriteStep {
    fn header(&self) -> &Header {
        &self.header
    }

    fn process(&mut self, row: Row, out: &mut Emitter) -> Result<()> {
        let line = self.line_of(&row);
        let file = self.open()?;
        file.meta.observe(&row, &line);
        file.writer.write_line(&line)?;
        if self.options.pass_through {
            out.emit(row);
        }
        Ok(())
    }

    fn finish(&mut self, _out: &mut Emitter) -> Result<()> {
        if self.done {
            return Ok(());
        }
        self.done = true;
        self.commit()
    }

    fn close(&mut self) {
        // Dropping the temporary file discards a partial result.
        self.file = None;
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::dictionary::Dictionary;
    use tempfile::TempDir;

    fn options(target: WriteTarget) -> WriteOptions {
        WriteOptions {
            target,
            pass_through: false,
            schema: false,
            card_columns: Vec::new(),
            tag: None,
        }
    }

    fn step(h: &Header, options: WriteOptions) -> WriteStep {
        WriteStep::new(
            h,
            options,
            Arc::new(Mutex::new(())),
            Arc::new(DictionaryCache::new()),
        )
    }

    #[test]
    fn test_write_file_with_meta() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.gor");
        let h = header(&["Chrom", "Pos", "Gene"]);
        let mut opts = options(WriteTarget::File(path.clone()));
        opts.card_columns = vec![("Gene".into(), 2)];
        opts.schema = true;
        let mut s = step(&h, opts);
        let out = run_step(
            &mut s,
            vec![row("chr1", 1, &["A"]), row("chr1", 5, &["B"]), row("chr2", 3, &["A"])],
        )
        .unwrap();
        assert!(out.is_empty());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "Chrom\tPos\tGene\nchr1\t1\tA\nchr1\t5\tB\nchr2\t3\tA\n"
        );
        let meta = MetaInfo::read(&path).unwrap().unwrap();
        assert_eq!(meta.lines, 3);
        assert_eq!(meta.cardinality, vec![("Gene".to_string(), vec!["A".to_string(), "B".to_string()])]);
        let (first, last) = meta.range.unwrap();
        assert_eq!((first.chrom.as_str(), first.pos), ("chr1", 1));
        assert_eq!((last.chrom.as_str(), last.pos), ("chr2", 3));
        assert_eq!(meta.schema.unwrap().len(), 3);
    }

    #[test]
    fn test_write_pass_through() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(WriteTarget::File(dir.path().join("x.gor")));
        opts.pass_through = true;
        let mut s = step(&header(&["Chrom", "Pos"]), opts);
        let out = run_step(&mut s, vec![row("chr1", 1, &[])]).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_write_folder_parts() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("result.gord");
        let h = header(&["Chrom", "Pos"]);
        let lock = Arc::new(Mutex::new(()));
        let cache = Arc::new(DictionaryCache::new());
        for rows in [
            vec![row("chr1", 1, &[]), row("chr1", 2, &[])],
            vec![row("chr2", 7, &[])],
        ] {
            let mut s = WriteStep::new(
                &h,
                options(WriteTarget::Folder(folder.clone())),
                lock.clone(),
                cache.clone(),
            );
            run_step(&mut s, rows).unwrap();
        }
        let dict = Dictionary::load(&folder).unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.header().unwrap().names(), &["Chrom", "Pos"]);
        assert!(dict.entries().iter().all(|e| e.path.exists() && e.range.is_some()));
    }

    #[test]
    fn test_closed_writer_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("never.gor");
        let mut s = step(&header(&["Chrom", "Pos"]), options(WriteTarget::File(path.clone())));
        let mut out = Emitter::default();
        s.process(row("chr1", 1, &[]), &mut out).unwrap();
        s.close();
        assert!(!path.exists());
    }
}
