//! Recoverable conditions found while merging sources
//!
//! Nothing in here aborts a resolution. Every [Warning] is kept in the [Diagnostics] list owned by the
//! [crate::config::Config] under construction and is also emitted through `tracing`.
use crate::source::{MemoryRegion, Modifier};

#[derive(Debug, Default, Clone, PartialEq, derive_new::new)]
pub struct Diagnostics {
    #[new(default)]
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn log(&mut self, warning: Warning) {
        tracing::warn!("{warning}");
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    #[error("You are attempting to override an undefined config parameter `{namespace}.{name}` in {set_by}. It is likely that you're overriding a config parameter from a library that is not part of the build.")]
    UndefinedOverride {
        namespace: String,
        name: String,
        set_by: String,
    },
    #[error("{region} region defined by `{namespace}` in {set_by} is ignored, it was already defined by `{existing_namespace}` in {existing_set_by}")]
    MemoryRedefined {
        region: MemoryRegion,
        namespace: String,
        set_by: String,
        existing_namespace: String,
        existing_set_by: String,
    },
    #[error("Cannot apply modifier {modifier:?} of `{namespace}.{name}` in {set_by} to a value that is not a list")]
    IncompatibleModifier {
        namespace: String,
        name: String,
        modifier: Modifier,
        set_by: String,
    },
}
