//! `.pattern` text-file loading: header parsing, DSL body evaluation, a
//! recursive file-tree walk, and a filesystem watcher that flags a rebuild
//! rather than performing one itself (the engine owns when a rebuild runs).

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use crate::dsl::{self, DslError};
use crate::pattern::LightPattern;

#[derive(Debug)]
pub enum LoaderError {
    Io(String),
    MissingSeparator(PathBuf),
    Dsl(PathBuf, DslError),
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderError::Io(msg) => write!(f, "{msg}"),
            LoaderError::MissingSeparator(path) => {
                write!(f, "{}: missing '---' header/body separator", path.display())
            }
            LoaderError::Dsl(path, err) => write!(f, "{}: {err}", path.display()),
        }
    }
}

impl std::error::Error for LoaderError {}

const DEFAULT_CATEGORY: &str = "Chill";

#[derive(Clone, Debug)]
pub struct PatternMeta {
    pub name: String,
    pub category: String,
    pub description: String,
    pub tags: Vec<String>,
    pub palette: Option<String>,
    pub path: PathBuf,
}

#[derive(Clone)]
pub struct PatternEntry {
    pub meta: PatternMeta,
    pub pattern: LightPattern,
    pub source: String,
}

/// The loaded set of patterns, in discovery order (the order patterns are
/// cycled through by `Engine::next_pattern`/`prev_pattern`).
#[derive(Clone, Default)]
pub struct PatternTable {
    pub entries: Vec<PatternEntry>,
}

impl PatternTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PatternEntry> {
        self.entries.get(index)
    }

    pub fn index_of_name(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.meta.name == name)
    }
}

/// Walks `dir` recursively collecting `*.pattern` files, sorted by path,
/// skipping any filename starting with `_` (scratch/disabled patterns).
pub fn discover_pattern_files(dir: &Path) -> Result<Vec<PathBuf>, LoaderError> {
    let mut found = Vec::new();
    walk(dir, &mut found)?;
    found.sort();
    Ok(found)
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), LoaderError> {
    let entries = fs::read_dir(dir).map_err(|e| LoaderError::Io(format!("failed to read {}: {e}", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| LoaderError::Io(format!("failed to read entry in {}: {e}", dir.display())))?;
        let path = entry.path();
        if path.is_dir() {
            walk(&path, out)?;
            continue;
        }
        let is_pattern_file = path.extension().and_then(|e| e.to_str()) == Some("pattern");
        let starts_with_underscore = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('_'))
            .unwrap_or(false);
        if is_pattern_file && !starts_with_underscore {
            out.push(path);
        }
    }
    Ok(())
}

/// Splits `name: value` header lines from the DSL body below a `---` line.
fn split_header_and_body(text: &str, path: &Path) -> Result<(HashMap<String, String>, String), LoaderError> {
    let Some(separator_pos) = text.find("\n---\n").or_else(|| {
        if text.starts_with("---\n") {
            Some(0)
        } else {
            None
        }
    }) else {
        return Err(LoaderError::MissingSeparator(path.to_path_buf()));
    };

    let (header_text, rest) = if separator_pos == 0 {
        ("", &text[4..])
    } else {
        (&text[..separator_pos], &text[separator_pos + 5..])
    };

    let mut header = HashMap::new();
    for line in header_text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            header.insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    Ok((header, rest.trim().to_string()))
}

fn meta_from_header(header: &HashMap<String, String>, path: &Path) -> PatternMeta {
    let default_name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("pattern").to_string();
    PatternMeta {
        name: header.get("name").cloned().unwrap_or(default_name),
        category: header.get("category").cloned().unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        description: header.get("description").cloned().unwrap_or_default(),
        tags: header
            .get("tags")
            .map(|t| t.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default(),
        palette: header.get("palette").cloned(),
        path: path.to_path_buf(),
    }
}

/// Parses and evaluates a single `.pattern` file into a ready-to-use entry.
pub fn load_pattern_file(path: &Path) -> Result<PatternEntry, LoaderError> {
    let text = fs::read_to_string(path).map_err(|e| LoaderError::Io(format!("failed to read {}: {e}", path.display())))?;
    let (header, body) = split_header_and_body(&text, path)?;
    let meta = meta_from_header(&header, path);
    let pattern = dsl::parse(&body).map_err(|e| LoaderError::Dsl(path.to_path_buf(), e))?;
    Ok(PatternEntry { meta, pattern, source: body })
}

/// Loads every `.pattern` file under `dir`. Individual failures are
/// collected rather than aborting the whole table, so one broken pattern
/// doesn't take the rest of the set down on hot reload.
pub fn load_patterns_dir(dir: &Path) -> (PatternTable, Vec<LoaderError>) {
    let mut table = PatternTable::default();
    let mut errors = Vec::new();

    let files = match discover_pattern_files(dir) {
        Ok(files) => files,
        Err(e) => return (table, vec![e]),
    };

    for path in files {
        match load_pattern_file(&path) {
            Ok(entry) => table.entries.push(entry),
            Err(e) => errors.push(e),
        }
    }

    (table, errors)
}

/// Read-back accessor for the control server's pattern-CRUD commands.
pub fn get_pattern_source(path: &Path) -> Result<(PatternMeta, String), LoaderError> {
    let text = fs::read_to_string(path).map_err(|e| LoaderError::Io(format!("failed to read {}: {e}", path.display())))?;
    let (header, body) = split_header_and_body(&text, path)?;
    Ok((meta_from_header(&header, path), body))
}

/// Writes a `.pattern` file's header block followed by `---` and the body.
/// Header lines for empty/absent fields are omitted entirely.
pub fn save_pattern(
    path: &Path,
    name: &str,
    body: &str,
    description: &str,
    tags: &[String],
    palette: Option<&str>,
    category: Option<&str>,
) -> Result<(), LoaderError> {
    let mut header = String::new();
    if !name.is_empty() {
        header.push_str(&format!("name: {name}\n"));
    }
    header.push_str(&format!("category: {}\n", category.unwrap_or(DEFAULT_CATEGORY)));
    if !description.is_empty() {
        header.push_str(&format!("description: {description}\n"));
    }
    if !tags.is_empty() {
        header.push_str(&format!("tags: {}\n", tags.join(", ")));
    }
    if let Some(palette) = palette {
        header.push_str(&format!("palette: {palette}\n"));
    }

    let contents = format!("{header}---\n{}\n", body.trim_end());
    fs::write(path, contents).map_err(|e| LoaderError::Io(format!("failed to write {}: {e}", path.display())))
}

pub fn delete_pattern(path: &Path) -> Result<(), LoaderError> {
    fs::remove_file(path).map_err(|e| LoaderError::Io(format!("failed to delete {}: {e}", path.display())))
}

/// Evaluates a body through the DSL without persisting anything, for the
/// control server's `validate_pattern` command and the `validate-patterns`
/// CLI subcommand.
pub fn validate_pattern(body: &str) -> Result<(), DslError> {
    dsl::parse(body).map(|_| ())
}

/// Watches `dir` recursively; sets `reload_flag` whenever a `.pattern` file's
/// content changes. The engine is responsible for noticing the flag and
/// performing the actual from-scratch rebuild under its own lock.
pub fn watch_patterns_dir(dir: &Path, reload_flag: Arc<AtomicBool>) -> notify::Result<RecommendedWatcher> {
    let watched_dir = dir.to_path_buf();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                error!("pattern directory watch error: {e}");
                return;
            }
        };
        if event.kind
            != notify::EventKind::Modify(notify::event::ModifyKind::Data(notify::event::DataChange::Content))
        {
            return;
        }
        info!("{:?} changed, flagging pattern table for reload", watched_dir);
        reload_flag.store(true, Ordering::SeqCst);
    })?;
    watcher.watch(dir, RecursiveMode::Recursive)?;
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_header_and_evaluates_body() {
        let dir = std::env::temp_dir().join(format!("lattice-loader-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = write_file(
            &dir,
            "pulse.pattern",
            "name: Pulse\ncategory: Energy\ndescription: a test pattern\ntags: test, demo\n---\nlight(\"0 1\")\n",
        );

        let entry = load_pattern_file(&path).unwrap();
        assert_eq!(entry.meta.name, "Pulse");
        assert_eq!(entry.meta.category, "Energy");
        assert_eq!(entry.meta.tags, vec!["test".to_string(), "demo".to_string()]);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_separator_is_an_error() {
        let dir = std::env::temp_dir().join(format!("lattice-loader-test2-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = write_file(&dir, "broken.pattern", "name: Broken\nlight(\"0\")\n");
        assert!(load_pattern_file(&path).is_err());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn discovery_skips_underscore_prefixed_files_and_sorts() {
        let dir = std::env::temp_dir().join(format!("lattice-loader-test3-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        write_file(&dir, "b.pattern", "name: B\n---\nlight(\"0\")\n");
        write_file(&dir, "a.pattern", "name: A\n---\nlight(\"0\")\n");
        write_file(&dir, "_scratch.pattern", "name: Scratch\n---\nlight(\"0\")\n");

        let files = discover_pattern_files(&dir).unwrap();
        let names: Vec<String> = files.iter().map(|p| p.file_name().unwrap().to_str().unwrap().to_string()).collect();
        assert_eq!(names, vec!["a.pattern".to_string(), "b.pattern".to_string()]);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = std::env::temp_dir().join(format!("lattice-loader-test4-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("roundtrip.pattern");

        save_pattern(&path, "Roundtrip", "light(\"0 1 2\")", "desc", &["a".to_string()], Some("fire"), None).unwrap();
        let (meta, body) = get_pattern_source(&path).unwrap();
        assert_eq!(meta.name, "Roundtrip");
        assert_eq!(meta.category, DEFAULT_CATEGORY);
        assert_eq!(meta.palette.as_deref(), Some("fire"));
        assert_eq!(body, "light(\"0 1 2\")");

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn invalid_body_fails_validation() {
        assert!(validate_pattern("not_a_real_fn(\"x\")").is_err());
        assert!(validate_pattern("light(\"0\")").is_ok());
    }
}
