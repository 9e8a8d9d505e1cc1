//! Discovery and selection of configuration documents in a source tree
//!
//! [find_files] walks a directory tree looking for files by name. Rules from `.mbedignore` files are picked up
//! on the way down and apply to the directory containing the ignore file and everything below it. Filtering is
//! greedy: once a directory is excluded its children are never visited.
//!
//! [filter_files] narrows a candidate list down with [LabelFilter]s. A path labelled `TARGET_K64F` is only kept
//! when `K64F` is an active target label, `FEATURE_*` and `COMPONENT_*` directories work the same way.
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

pub const IGNORE_FILE_NAME: &str = ".mbedignore";

/// Directories excluded regardless of ignore files
const LEGACY_IGNORE_PATTERNS: [&str; 2] = ["*/TESTS", "*/TEST_APPS"];

/// Recursively find files called `file_name` under `directory`
///
/// Paths are returned canonicalized, in directory-walk order (entries of one directory in file name order).
/// Files reachable more than once through symbolic links are returned once.
pub fn find_files(file_name: &str, directory: &Path) -> Result<Vec<PathBuf>, FindError> {
    let directory = directory
        .canonicalize()
        .map_err(|source| FindError::io(directory, source))?;

    let legacy = IgnoreFilter::new(&LEGACY_IGNORE_PATTERNS)?;
    let mut walked = HashSet::new();
    let mut found = indexmap::IndexSet::new();
    walk(file_name, &directory, &[legacy], &mut walked, &mut found)?;

    tracing::debug!(directory=%directory.display(), %file_name, count=found.len(), "found files");
    Ok(found.into_iter().collect())
}

fn walk(
    file_name: &str,
    directory: &Path,
    filters: &[IgnoreFilter],
    walked: &mut HashSet<PathBuf>,
    found: &mut indexmap::IndexSet<PathBuf>,
) -> Result<(), FindError> {
    walked.insert(directory.to_path_buf());

    let mut children = std::fs::read_dir(directory)
        .map_err(|source| FindError::io(directory, source))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| FindError::io(directory, source))?;
    children.sort();

    // an ignore file applies to its own directory as well as its descendants
    let mut filters = filters.to_vec();
    let ignore_file = directory.join(IGNORE_FILE_NAME);
    if children.contains(&ignore_file) {
        filters.push(IgnoreFilter::from_file(&ignore_file)?);
    }

    for child in children {
        if filters.iter().any(|filter| filter.is_ignored(&child)) {
            tracing::trace!(path=%child.display(), "ignored");
            continue;
        }

        let child = if child.is_symlink() {
            match child.canonicalize() {
                Ok(resolved) => resolved,
                Err(_) => {
                    tracing::debug!(path=%child.display(), "skipping dangling symlink");
                    continue;
                }
            }
        } else {
            child
        };

        if child.is_dir() {
            // every directory is walked at most once, however many links lead to it
            if walked.contains(&child) {
                tracing::trace!(path=%child.display(), "already walked");
                continue;
            }
            walk(file_name, &child, &filters, walked, found)?;
        } else if child.is_file() && child.file_name().is_some_and(|name| name == file_name) {
            found.insert(child);
        }
    }

    Ok(())
}

/// Exclusion rules from one `.mbedignore` file
///
/// Patterns use shell style wildcards where `*` also matches `/`. They are rooted in the directory of the
/// ignore file and matched against the full path.
#[derive(Debug, Clone)]
pub struct IgnoreFilter {
    patterns: GlobSet,
}

impl IgnoreFilter {
    pub fn new(patterns: &[impl AsRef<str>]) -> Result<Self, FindError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = Glob::new(pattern).map_err(|source| FindError::Pattern {
                pattern: pattern.to_string(),
                source,
            })?;
            builder.add(glob);
        }

        let patterns = builder.build().map_err(|source| FindError::Pattern {
            pattern: String::new(),
            source,
        })?;
        Ok(Self { patterns })
    }

    pub fn from_file(path: &Path) -> Result<Self, FindError> {
        let contents = std::fs::read_to_string(path).map_err(|source| FindError::io(path, source))?;
        let root = path.parent().unwrap_or(Path::new(""));

        let patterns: Vec<String> = contents
            .lines()
            .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
            .map(|line| root.join(line.trim()).to_string_lossy().into_owned())
            .collect();

        tracing::debug!(path=%path.display(), ?patterns, "loaded ignore file");
        Self::new(&patterns)
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        self.patterns.is_match(path)
    }
}

/// Keeps paths whose `<prefix>_<value>` segments all name allowed values
#[derive(Debug, Clone)]
pub struct LabelFilter {
    prefix: String,
    allowed: BTreeSet<String>,
}

impl LabelFilter {
    pub fn new<'a>(label_type: &str, allowed: impl IntoIterator<Item = &'a String>) -> Self {
        Self {
            prefix: format!("{label_type}_"),
            allowed: allowed.into_iter().cloned().collect(),
        }
    }

    pub fn is_allowed(&self, path: &Path) -> bool {
        path.components().all(|component| {
            let segment = component.as_os_str().to_string_lossy();
            match segment.strip_prefix(self.prefix.as_str()) {
                Some(value) => self.allowed.contains(value),
                None => true,
            }
        })
    }
}

/// Keep only the paths every filter allows
pub fn filter_files<'p>(
    paths: impl IntoIterator<Item = &'p PathBuf>,
    filters: &[LabelFilter],
) -> Vec<&'p PathBuf> {
    paths
        .into_iter()
        .filter(|path| filters.iter().all(|filter| filter.is_allowed(path)))
        .collect()
}

/// The `TARGET_`, `FEATURE_` and `COMPONENT_` filters for one set of labels
pub fn label_filters(
    labels: &BTreeSet<String>,
    features: &BTreeSet<String>,
    components: &BTreeSet<String>,
) -> [LabelFilter; 3] {
    [
        LabelFilter::new("TARGET", labels),
        LabelFilter::new("FEATURE", features),
        LabelFilter::new("COMPONENT", components),
    ]
}

#[derive(thiserror::Error, Debug)]
pub enum FindError {
    #[error("Unable to read '{}'", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid ignore pattern '{pattern}'")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

impl FindError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        FindError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
