//! Resolution of the final [Config] for one target
//!
//! Which library documents take part depends on the labels, features and components of the configuration, and
//! the configuration in turn depends on which documents take part. [assemble_config] resolves this by running
//! passes until the selected set stops changing:
//!
//! 1. select candidates by the current labels, features and components
//! 2. prepare every selected document against the current labels
//! 3. rebuild the configuration from scratch: target first, libraries in discovery order, application last
//!
//! Rebuilding instead of patching the previous pass keeps duplicate detection and first-writer-wins memories
//! exact when a document drops out of the selection.
use crate::config::{Config, ConfigError, REQUIRES};
use crate::documents::{Documents, LoadError};
use crate::find_files::{filter_files, find_files, label_filters, FindError};
use crate::source::{prepare, SourceError, APP_NAMESPACE, TARGET_NAMESPACE};
use crate::value::Value;
use indexmap::IndexSet;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub const LIB_FILE_NAME: &str = "mbed_lib.json";
pub const APP_FILE_NAME: &str = "mbed_app.json";

/// Passes after which the configuration is considered circular
pub const MAX_PASSES: usize = 32;

/// Resolve the configuration of `target` from the libraries below `search_roots`
///
/// `target` is the attributes document of an already resolved target (see [crate::targets]). The optional
/// application document is applied last in every pass.
pub fn assemble_config(
    target: &serde_json::Value,
    search_roots: &[PathBuf],
    app_file: Option<&Path>,
) -> Result<Config, AssembleError> {
    let candidates = find_candidates(search_roots)?;
    let mut documents = Documents::default();
    assemble_from_candidates(target, &candidates, app_file, &mut documents)
}

/// Every library document below `search_roots`
///
/// Files reachable from more than one root are listed once, at the position of their first discovery.
pub fn find_candidates(search_roots: &[PathBuf]) -> Result<Vec<PathBuf>, FindError> {
    let mut candidates = IndexSet::new();
    for root in search_roots {
        candidates.extend(find_files(LIB_FILE_NAME, root)?);
    }
    Ok(candidates.into_iter().collect())
}

/// Run the resolution passes over an already discovered candidate list
///
/// Documents already present in `documents` are used as they are, everything else is loaded from disk.
pub fn assemble_from_candidates(
    target: &serde_json::Value,
    candidates: &[PathBuf],
    app_file: Option<&Path>,
    documents: &mut Documents,
) -> Result<Config, AssembleError> {
    let target_source = prepare(
        target,
        TARGET_NAMESPACE,
        Some(TARGET_NAMESPACE),
        &target_labels(target),
    )?;

    // an application listing `requires` narrows the libraries to those it (transitively) requires
    let app_requires = match app_file {
        Some(path) => top_level_set(documents.load_file(path)?, REQUIRES),
        None => BTreeSet::new(),
    };
    let requires_filter = !app_requires.is_empty();

    let mut state = PassState::new(
        &Config::from_sources([target_source.clone()])?,
        requires_filter,
    );
    if let Some(requires) = &mut state.requires {
        requires.extend(app_requires);
    }

    for pass in 1..=MAX_PASSES {
        tracing::debug!(
            pass,
            labels=?state.labels,
            features=?state.features,
            components=?state.components,
            "starting pass"
        );

        let filters = label_filters(&state.labels, &state.features, &state.components);
        let mut sources = vec![target_source.clone()];

        for path in filter_files(candidates, &filters) {
            let document = documents.load_file(path)?;
            if let Some(requires) = &state.requires {
                if !is_required(document, requires) {
                    tracing::trace!(path=%path.display(), "not required");
                    continue;
                }
            }
            sources.push(prepare(document, &file_origin(path), None, &state.labels)?);
        }

        if let Some(path) = app_file {
            let document = documents.load_file(path)?;
            sources.push(prepare(
                document,
                &file_origin(path),
                Some(APP_NAMESPACE),
                &state.labels,
            )?);
        }

        tracing::debug!(pass, sources = sources.len(), "merging sources");
        let config = Config::from_sources(sources)?;
        let next = PassState::new(&config, requires_filter);

        if next == state {
            tracing::info!(
                passes = pass,
                settings = config.settings().count(),
                warnings = config.diagnostics().warnings().len(),
                "configuration resolved"
            );
            return Ok(config);
        }
        state = next;
    }

    Err(AssembleError::NotConverged { passes: MAX_PASSES })
}

/// What decides the selection of a pass
#[derive(Debug, PartialEq)]
struct PassState {
    labels: BTreeSet<String>,
    features: BTreeSet<String>,
    components: BTreeSet<String>,
    requires: Option<BTreeSet<String>>,
}

impl PassState {
    fn new(config: &Config, requires_filter: bool) -> Self {
        Self {
            labels: config.all_labels(),
            features: config.features().clone(),
            components: config.components().clone(),
            requires: requires_filter.then(|| config.requires().clone()),
        }
    }
}

fn target_labels(target: &serde_json::Value) -> BTreeSet<String> {
    let mut labels = top_level_set(target, crate::config::LABELS);
    labels.extend(top_level_set(target, crate::config::EXTRA_LABELS));
    labels
}

fn top_level_set(document: &serde_json::Value, key: &str) -> BTreeSet<String> {
    document
        .get(key)
        .map(Value::from)
        .map(Value::into_set)
        .unwrap_or_default()
}

/// Libraries without a usable name are kept so that preparing them reports the problem
fn is_required(document: &serde_json::Value, requires: &BTreeSet<String>) -> bool {
    match document.get("name").and_then(serde_json::Value::as_str) {
        Some(name) => requires.contains(name),
        None => true,
    }
}

fn file_origin(path: &Path) -> String {
    format!("File: {}", path.display())
}

#[derive(thiserror::Error, Debug)]
pub enum AssembleError {
    #[error("Unable to load configuration document")]
    Load(#[from] LoadError),
    #[error("Invalid configuration document")]
    Source(#[from] SourceError),
    #[error("Unable to discover configuration documents")]
    Find(#[from] FindError),
    #[error("Unable to merge configuration")]
    Config(#[from] ConfigError),
    #[error("Configuration did not settle after {passes} passes, check for circular `_add`/`_remove` overrides")]
    NotConverged { passes: usize },
}
