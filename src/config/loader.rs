//! Configuration source loading.
//!
//! # Responsibilities
//! - Read the root document from a file or from in-memory text
//! - Expand `<include file=.../>` directives in place: exact paths,
//!   paths relative to the including file, and `*`/`?` masks
//! - Record every file read, with its own `autoReload` flag, so the
//!   watcher knows what to observe
//!
//! # Design Decisions
//! - Included documents are flattened into one ordered section list, so
//!   targets and rules may reference each other across files and in any
//!   document order
//! - A file included twice is read once

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::config::error::{ConfigError, Result};
use crate::config::xml::{parse_document, DuplicateAttribute, XmlElement};
use crate::layout::parser::parse_bool;
use crate::observability::internal::InternalLogger;
use crate::routing::matcher::NameMatcher;

/// A file whose modification may trigger a reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedFile {
    pub path: PathBuf,
    pub auto_reload: bool,
}

/// Root element plus every section from the root and its includes.
#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub root: XmlElement,
    pub sections: Vec<XmlElement>,
    pub duplicates: Vec<DuplicateAttribute>,
    pub watched: Vec<WatchedFile>,
}

/// Absolute, symlink-resolved form of `path` when it exists.
pub fn normalize_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    // File may be mid-replace; resolve the directory instead.
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            match fs::canonicalize(parent) {
                Ok(dir) => dir.join(name),
                Err(_) => std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
            }
        }
        _ => std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
    }
}

/// Best-effort check for `autoReload='true'` in text that may not parse.
pub fn sniff_auto_reload(text: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"(?i)\bautoReload\s*=\s*["']\s*true\s*["']"#).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(text))
}

struct Loader<'a> {
    internal: &'a InternalLogger,
    visited: HashSet<PathBuf>,
    sections: Vec<XmlElement>,
    duplicates: Vec<DuplicateAttribute>,
    watched: Vec<WatchedFile>,
}

pub fn load_file(path: &Path, internal: &InternalLogger) -> Result<LoadedSource> {
    let path = normalize_path(path);
    let text = fs::read_to_string(&path).map_err(|e| ConfigError::Load {
        path: path.clone(),
        source: Box::new(ConfigError::Io(e)),
    })?;
    load(&text, Some(&path), path.parent(), internal).map_err(|e| match e {
        ConfigError::Load { .. } => e,
        other => ConfigError::Load {
            path: path.clone(),
            source: Box::new(other),
        },
    })
}

/// Load from text. Relative includes resolve against `base_dir`, or the
/// current directory when it is `None`.
pub fn load_text(text: &str, base_dir: Option<&Path>, internal: &InternalLogger) -> Result<LoadedSource> {
    load(text, None, base_dir, internal)
}

fn load(
    text: &str,
    file: Option<&Path>,
    base_dir: Option<&Path>,
    internal: &InternalLogger,
) -> Result<LoadedSource> {
    let document = parse_document(text)?;
    let root = nlog_root(document.root)?;
    let auto_reload = flag(&root, "autoReload")?.unwrap_or(false);

    let mut loader = Loader {
        internal,
        visited: HashSet::new(),
        sections: Vec::new(),
        duplicates: document.duplicates,
        watched: Vec::new(),
    };
    if let Some(file) = file {
        loader.visited.insert(file.to_path_buf());
        loader.watched.push(WatchedFile {
            path: file.to_path_buf(),
            auto_reload,
        });
    }

    let base_dir = base_dir
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_default();
    loader.expand(&root, &base_dir, auto_reload)?;

    let mut root = root;
    root.children.clear();
    Ok(LoadedSource {
        root,
        sections: loader.sections,
        duplicates: loader.duplicates,
        watched: loader.watched,
    })
}

fn flag(element: &XmlElement, name: &str) -> Result<Option<bool>> {
    element.attr(name).map(|v| parse_bool(name, v)).transpose()
}

/// Accept `<nlog>` or `<configuration><nlog>...</nlog></configuration>`.
fn nlog_root(root: XmlElement) -> Result<XmlElement> {
    if root.is("nlog") {
        return Ok(root);
    }
    if root.is("configuration") {
        if let Some(nlog) = root.children.into_iter().find(|c| c.is("nlog")) {
            return Ok(nlog);
        }
        return Err(ConfigError::Xml("'configuration' element has no 'nlog' section".to_string()));
    }
    Err(ConfigError::Xml(format!(
        "unexpected root element '{}', expected 'nlog'",
        root.name
    )))
}

impl Loader<'_> {
    fn expand(&mut self, root: &XmlElement, base_dir: &Path, auto_reload: bool) -> Result<()> {
        for child in &root.children {
            if child.is("include") {
                self.include(child, base_dir, auto_reload)?;
            } else {
                self.sections.push(child.clone());
            }
        }
        Ok(())
    }

    fn include(&mut self, element: &XmlElement, base_dir: &Path, auto_reload: bool) -> Result<()> {
        let file = element.required_attr("file")?;
        let ignore_errors = flag(element, "ignoreErrors")?.unwrap_or(false);

        let result = if file.contains('*') || file.contains('?') {
            self.include_mask(file, base_dir, auto_reload)
        } else {
            let path = base_dir.join(file);
            if path.is_file() {
                self.include_file(&path, auto_reload)
            } else {
                Err(ConfigError::IncludeNotFound(path))
            }
        };

        match result {
            Err(e) if ignore_errors => {
                self.internal
                    .warn(format!("Skipping included file '{}': {}", file, e));
                Ok(())
            }
            other => other,
        }
    }

    fn include_mask(&mut self, file: &str, base_dir: &Path, auto_reload: bool) -> Result<()> {
        let full = base_dir.join(file);
        let dir = full.parent().map(Path::to_path_buf).unwrap_or_default();
        let mask = full
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let matcher = NameMatcher::new(&mask);

        let entries = fs::read_dir(&dir).map_err(|_| ConfigError::IncludeNotFound(full.clone()))?;
        let mut matches: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| {
                path.file_name()
                    .is_some_and(|name| matcher.matches(&name.to_string_lossy()))
            })
            .collect();
        matches.sort();

        self.internal.debug(format!(
            "Include mask '{}' matched {} file(s) in {}",
            mask,
            matches.len(),
            dir.display()
        ));
        for path in matches {
            self.include_file(&path, auto_reload)?;
        }
        Ok(())
    }

    fn include_file(&mut self, path: &Path, parent_auto_reload: bool) -> Result<()> {
        let path = normalize_path(path);
        if !self.visited.insert(path.clone()) {
            self.internal
                .debug(format!("Skipping already included file {}", path.display()));
            return Ok(());
        }

        let wrap = |e: ConfigError| ConfigError::Include {
            path: path.clone(),
            source: Box::new(e),
        };
        let text = fs::read_to_string(&path).map_err(|e| wrap(ConfigError::Io(e)))?;
        let document = parse_document(&text).map_err(wrap)?;
        let root = nlog_root(document.root).map_err(wrap)?;
        let auto_reload = flag(&root, "autoReload").map_err(wrap)?.unwrap_or(parent_auto_reload);

        self.internal.debug(format!("Including file {}", path.display()));
        self.duplicates.extend(document.duplicates);
        self.watched.push(WatchedFile {
            path: path.clone(),
            auto_reload,
        });

        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        self.expand(&root, &dir, auto_reload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_sniffs_auto_reload_in_broken_text() {
        assert!(sniff_auto_reload("<nlog autoReload='true'><targets>"));
        assert!(sniff_auto_reload("<nlog AUTORELOAD = \"True\" >"));
        assert!(!sniff_auto_reload("<nlog autoReload='false'>"));
    }

    #[test]
    fn test_relative_include_is_flattened_and_watched() {
        let dir = tempfile::TempDir::new().unwrap();
        write(dir.path(), "inner.config", "<nlog><targets><target type='Null' name='n'/></targets></nlog>");
        let root = write(
            dir.path(),
            "main.config",
            "<nlog autoReload='true'><include file='inner.config'/><rules/></nlog>",
        );
        let internal = InternalLogger::default();
        let loaded = load_file(&root, &internal).unwrap();

        let names: Vec<&str> = loaded.sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["targets", "rules"]);
        assert_eq!(loaded.watched.len(), 2);
        assert!(loaded.watched.iter().all(|w| w.auto_reload));
        assert_eq!(loaded.watched[0].path, normalize_path(&root));
    }

    #[test]
    fn test_included_file_keeps_its_own_auto_reload() {
        let dir = tempfile::TempDir::new().unwrap();
        write(dir.path(), "inner.config", "<nlog autoReload='true'/>");
        let root = write(dir.path(), "main.config", "<nlog><include file='inner.config'/></nlog>");
        let loaded = load_file(&root, &InternalLogger::default()).unwrap();
        assert!(!loaded.watched[0].auto_reload);
        assert!(loaded.watched[1].auto_reload);
    }

    #[test]
    fn test_missing_include_errors_unless_ignored() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = write(dir.path(), "main.config", "<nlog><include file='nope.config'/></nlog>");
        let err = load_file(&root, &InternalLogger::default()).unwrap_err();
        assert!(matches!(err.root_cause(), ConfigError::IncludeNotFound(_)));

        let tolerant = write(
            dir.path(),
            "tolerant.config",
            "<nlog><include file='nope.config' ignoreErrors='true'/></nlog>",
        );
        let loaded = load_file(&tolerant, &InternalLogger::default()).unwrap();
        assert_eq!(loaded.watched.len(), 1);
    }

    #[test]
    fn test_wildcard_include_in_name_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let sub = dir.path().join("conf.d");
        fs::create_dir(&sub).unwrap();
        write(&sub, "b.nlog", "<nlog><rules/></nlog>");
        write(&sub, "a.nlog", "<nlog><targets/></nlog>");
        write(&sub, "ignored.txt", "not xml");
        let loaded = load_text(
            "<nlog><include file='conf.d/*.nlog'/></nlog>",
            Some(dir.path()),
            &InternalLogger::default(),
        )
        .unwrap();
        let names: Vec<&str> = loaded.sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["targets", "rules"]);
        assert_eq!(loaded.watched.len(), 2);
    }

    #[test]
    fn test_configuration_wrapper_is_accepted() {
        let loaded = load_text(
            "<configuration><nlog throwExceptions='true'><targets/></nlog></configuration>",
            None,
            &InternalLogger::default(),
        )
        .unwrap();
        assert_eq!(loaded.root.attr("throwExceptions"), Some("true"));
        assert!(loaded.watched.is_empty());
    }
}
