//! The merged configuration of one resolution
//!
//! [Config] accumulates [Source]s one at a time. Each source is split into [Section]s which are applied in a
//! fixed order: config settings, overrides, macros, memories and finally every other field.
//!
//! Merge rules per section:
//! - settings: inserted by `(namespace, name)`; defining the same key twice is an error
//! - overrides: `requires` is unioned, cumulative fields and plain fields are modified in place, otherwise the
//!   setting with the same key gets a new value. Overriding a setting nobody defined is only a [Warning].
//! - macros: unioned
//! - memories: the first source defining a region wins
//! - other fields: cumulative fields are unioned, plain fields are replaced
use crate::diagnostics::{Diagnostics, Warning};
use crate::source::{ConfigSetting, Memory, Modifier, Override, SettingKey, Source};
use crate::value::{build_setting_value, Value};
use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet};

pub const LABELS: &str = "labels";
pub const EXTRA_LABELS: &str = "extra_labels";
pub const FEATURES: &str = "features";
pub const COMPONENTS: &str = "components";
pub const DEVICE_HAS: &str = "device_has";
pub const REQUIRES: &str = "requires";
const MACROS: &str = "macros";

/// Fields assembled by union/difference across all sources
pub const CUMULATIVE_FIELDS: [&str; 8] = [
    LABELS,
    EXTRA_LABELS,
    FEATURES,
    COMPONENTS,
    DEVICE_HAS,
    REQUIRES,
    "sectors",
    "header_info",
];

static EMPTY: BTreeSet<String> = BTreeSet::new();

/// The parts of a [Source], in the order they are merged
#[derive(Debug)]
pub enum Section {
    Config(Vec<ConfigSetting>),
    Overrides(Vec<Override>),
    Macros(BTreeSet<String>),
    Memories(Vec<Memory>),
    Other(String, Value),
}

impl Source {
    /// Split into sections, in merge order
    pub fn into_sections(self) -> (String, Vec<Section>) {
        let mut sections = vec![
            Section::Config(self.config),
            Section::Overrides(self.overrides),
            Section::Macros(self.macros),
            Section::Memories(self.memories),
        ];
        sections.extend(
            self.fields
                .into_iter()
                .map(|(key, value)| Section::Other(key, value)),
        );
        (self.origin, sections)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Config {
    settings: IndexMap<SettingKey, ConfigSetting>,
    macros: BTreeSet<String>,
    memories: Vec<Memory>,
    cumulative: BTreeMap<String, BTreeSet<String>>,
    attributes: BTreeMap<String, Value>,
    #[serde(skip)]
    diagnostics: Diagnostics,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings: Default::default(),
            macros: Default::default(),
            memories: Default::default(),
            cumulative: CUMULATIVE_FIELDS
                .iter()
                .map(|field| (field.to_string(), BTreeSet::new()))
                .collect(),
            attributes: Default::default(),
            diagnostics: Default::default(),
        }
    }
}

impl Config {
    /// Build a config from sources, in order
    pub fn from_sources(sources: impl IntoIterator<Item = Source>) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        for source in sources {
            config.insert(source)?;
        }
        Ok(config)
    }

    /// Merge one source into this config
    pub fn insert(&mut self, source: Source) -> Result<(), ConfigError> {
        tracing::debug!(origin=%source.origin, "merging source");
        let (origin, sections) = source.into_sections();
        for section in sections {
            self.insert_section(&origin, section)?;
        }
        Ok(())
    }

    fn insert_section(&mut self, origin: &str, section: Section) -> Result<(), ConfigError> {
        match section {
            Section::Config(settings) => self.insert_settings(origin, settings)?,
            Section::Overrides(overrides) => {
                for o in overrides {
                    self.apply_override(origin, o);
                }
            }
            Section::Macros(macros) => self.macros.extend(macros),
            Section::Memories(memories) => {
                for memory in memories {
                    self.insert_memory(memory);
                }
            }
            Section::Other(key, value) => self.insert_field(key, value),
        }
        Ok(())
    }

    fn insert_settings(
        &mut self,
        origin: &str,
        settings: Vec<ConfigSetting>,
    ) -> Result<(), ConfigError> {
        for mut setting in settings {
            if setting.is_presence_marker() {
                tracing::trace!(key=%setting.key(), "skipping presence marker");
                continue;
            }

            let key = setting.key();
            if let Some(existing) = self.settings.get(&key) {
                return Err(ConfigError::DuplicateSetting {
                    namespace: key.namespace,
                    name: key.name,
                    existing: existing.set_by.clone(),
                    new: origin.to_string(),
                });
            }

            tracing::trace!(%key, "adding config setting");
            setting.value = build_setting_value(setting.value);
            self.settings.insert(key, setting);
        }
        Ok(())
    }

    fn apply_override(&mut self, origin: &str, o: Override) {
        tracing::debug!(key=%o.key(), modifier=?o.modifier, value=?o.value, "applying override");

        if o.key().to_string().ends_with(crate::source::PRESENT_SUFFIX) {
            return;
        }

        if o.name == REQUIRES {
            self.cumulative
                .entry(REQUIRES.to_string())
                .or_default()
                .extend(o.value.into_set());
            return;
        }

        if o.name == MACROS {
            apply_to_macros(&mut self.macros, o.modifier, o.value.into_set());
            return;
        }

        if let Some(field) = self.cumulative.get_mut(&o.name) {
            apply_to_set(field, o.modifier, o.value.into_set());
            return;
        }

        if let Some(attribute) = self.attributes.get_mut(&o.name) {
            if apply_to_value(attribute, o.modifier, o.value).is_err() {
                self.diagnostics.log(Warning::IncompatibleModifier {
                    namespace: o.namespace,
                    name: o.name,
                    modifier: o.modifier,
                    set_by: origin.to_string(),
                });
            }
            return;
        }

        let Some(setting) = self.settings.get_mut(&o.key()) else {
            self.diagnostics.log(Warning::UndefinedOverride {
                namespace: o.namespace,
                name: o.name,
                set_by: origin.to_string(),
            });
            return;
        };

        if apply_to_value(&mut setting.value, o.modifier, build_setting_value(o.value)).is_ok() {
            setting.set_by = origin.to_string();
        } else {
            self.diagnostics.log(Warning::IncompatibleModifier {
                namespace: o.namespace,
                name: o.name,
                modifier: o.modifier,
                set_by: origin.to_string(),
            });
        }
    }

    fn insert_memory(&mut self, memory: Memory) {
        if let Some(existing) = self.memories.iter().find(|m| m.region == memory.region) {
            self.diagnostics.log(Warning::MemoryRedefined {
                region: memory.region,
                namespace: memory.namespace,
                set_by: memory.set_by,
                existing_namespace: existing.namespace.clone(),
                existing_set_by: existing.set_by.clone(),
            });
            return;
        }

        self.memories.push(memory);
    }

    fn insert_field(&mut self, key: String, value: Value) {
        if let Some(field) = self.cumulative.get_mut(&key) {
            field.extend(value.into_set());
        } else {
            self.attributes.insert(key, value);
        }
    }
}

fn apply_to_set(field: &mut BTreeSet<String>, modifier: Modifier, value: BTreeSet<String>) {
    match modifier {
        Modifier::Add => field.extend(value),
        Modifier::Remove => field.retain(|element| !value.contains(element)),
        Modifier::Set => *field = value,
    }
}

/// Removing `NAME` also removes `NAME=VALUE`
fn apply_to_macros(macros: &mut BTreeSet<String>, modifier: Modifier, value: BTreeSet<String>) {
    match modifier {
        Modifier::Remove => macros.retain(|existing| {
            let name = existing.split_once('=').map_or(existing.as_str(), |(name, _)| name);
            !value.contains(existing) && !value.contains(name)
        }),
        modifier => apply_to_set(macros, modifier, value),
    }
}

/// `set` replaces any value, `add`/`remove` only apply to sets
fn apply_to_value(current: &mut Value, modifier: Modifier, value: Value) -> Result<(), ()> {
    match (modifier, current) {
        (Modifier::Set, current) => *current = value,
        (modifier, Value::Set(set)) => apply_to_set(set, modifier, value.into_set()),
        _ => return Err(()),
    }
    Ok(())
}

impl Config {
    pub fn settings(&self) -> impl Iterator<Item = &ConfigSetting> {
        self.settings.values()
    }

    pub fn setting(&self, namespace: &str, name: &str) -> Option<&ConfigSetting> {
        self.settings.get(&SettingKey::new(namespace, name))
    }

    pub fn macros(&self) -> &BTreeSet<String> {
        &self.macros
    }

    pub fn memories(&self) -> &[Memory] {
        &self.memories
    }

    /// A cumulative field; unknown fields are empty
    pub fn cumulative(&self, field: &str) -> &BTreeSet<String> {
        self.cumulative.get(field).unwrap_or(&EMPTY)
    }

    pub fn cumulative_fields(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.cumulative
            .iter()
            .map(|(field, values)| (field.as_str(), values))
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn labels(&self) -> &BTreeSet<String> {
        self.cumulative(LABELS)
    }

    pub fn extra_labels(&self) -> &BTreeSet<String> {
        self.cumulative(EXTRA_LABELS)
    }

    /// `labels` ∪ `extra_labels`
    pub fn all_labels(&self) -> BTreeSet<String> {
        self.labels().union(self.extra_labels()).cloned().collect()
    }

    pub fn features(&self) -> &BTreeSet<String> {
        self.cumulative(FEATURES)
    }

    pub fn components(&self) -> &BTreeSet<String> {
        self.cumulative(COMPONENTS)
    }

    pub fn device_has(&self) -> &BTreeSet<String> {
        self.cumulative(DEVICE_HAS)
    }

    pub fn requires(&self) -> &BTreeSet<String> {
        self.cumulative(REQUIRES)
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Setting {namespace}.{name} already defined by {existing}, cannot define it again in {new}. You cannot duplicate config settings!")]
    DuplicateSetting {
        namespace: String,
        name: String,
        existing: String,
        new: String,
    },
}
