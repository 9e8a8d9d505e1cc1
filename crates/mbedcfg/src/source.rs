//! Normalized configuration sources
//!
//! A raw document (target attributes, an `mbed_lib.json` or the `mbed_app.json`) is turned into a [Source]
//! by [prepare]. Preparing a document
//! - namespaces every key of its `config` section,
//! - keeps only those `target_overrides` entries that apply to the current labels,
//! - splits override keys into base key and [Modifier],
//! - turns the synthetic `mbed_{ram,rom}_{start,size}` keys into [Memory] records,
//! - and collects every remaining top level key as a cumulative or plain field.
//!
//! A [Source] is consumed exactly once by [crate::config::Config::insert].
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::BTreeSet;

pub const TARGET_NAMESPACE: &str = "target";
pub const APP_NAMESPACE: &str = "app";

/// Settings ending in this suffix only announce availability of a feature or component
pub const PRESENT_SUFFIX: &str = ".present";

const NAME_KEY: &str = "name";
const CONFIG_KEY: &str = "config";
const OVERRIDES_KEY: &str = "overrides";
const TARGET_OVERRIDES_KEY: &str = "target_overrides";
const MACROS_KEY: &str = "macros";
const WILDCARD_LABEL: &str = "*";

/// Identity of a [ConfigSetting] inside a [crate::config::Config]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_new::new)]
pub struct SettingKey {
    #[new(into)]
    pub namespace: String,
    #[new(into)]
    pub name: String,
}

impl std::fmt::Display for SettingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

impl serde::Serialize for SettingKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A single config parameter declared in a `config` section
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ConfigSetting {
    pub namespace: String,
    pub name: String,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
    /// Explicit name of the emitted definition; a name is derived from the key when missing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub macro_name: Option<String>,
    /// Human readable identity of the source that last set the value
    pub set_by: String,
}

impl ConfigSetting {
    pub fn key(&self) -> SettingKey {
        SettingKey::new(&self.namespace, &self.name)
    }

    /// Name of the compiler definition carrying this setting
    pub fn macro_name(&self) -> String {
        match &self.macro_name {
            Some(name) => name.clone(),
            None => default_macro_name(&self.namespace, &self.name),
        }
    }

    pub fn is_presence_marker(&self) -> bool {
        self.key().to_string().ends_with(PRESENT_SUFFIX)
    }
}

/// `MBED_CONF_<NAMESPACE>_<NAME>`, upper-cased with `.` and `-` replaced by `_`
pub fn default_macro_name(namespace: &str, name: &str) -> String {
    let sanitized: String = format!("{namespace}.{name}")
        .chars()
        .map(|c| match c {
            '.' | '-' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect();
    format!("MBED_CONF_{sanitized}")
}

/// How an [Override] changes its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    Set,
    Add,
    Remove,
}

impl Modifier {
    /// Split `features_add` into `(features, Add)`
    pub fn split(name: &str) -> (&str, Modifier) {
        if let Some(base) = name.strip_suffix("_add") {
            (base, Modifier::Add)
        } else if let Some(base) = name.strip_suffix("_remove") {
            (base, Modifier::Remove)
        } else {
            (name, Modifier::Set)
        }
    }
}

/// A directive to change a setting or a cumulative field
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Override {
    pub namespace: String,
    pub name: String,
    pub value: Value,
    pub modifier: Modifier,
}

impl Override {
    pub fn key(&self) -> SettingKey {
        SettingKey::new(&self.namespace, &self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemoryRegion {
    Ram,
    Rom,
}

impl MemoryRegion {
    pub const ALL: [MemoryRegion; 2] = [MemoryRegion::Ram, MemoryRegion::Rom];

    fn start_key(self) -> &'static str {
        match self {
            MemoryRegion::Ram => "mbed_ram_start",
            MemoryRegion::Rom => "mbed_rom_start",
        }
    }

    fn size_key(self) -> &'static str {
        match self {
            MemoryRegion::Ram => "mbed_ram_size",
            MemoryRegion::Rom => "mbed_rom_size",
        }
    }

    fn is_memory_key(key: &str) -> bool {
        Self::ALL
            .iter()
            .any(|region| region.start_key() == key || region.size_key() == key)
    }
}

impl std::fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryRegion::Ram => f.write_str("RAM"),
            MemoryRegion::Rom => f.write_str("ROM"),
        }
    }
}

/// Layout of one memory region; `start` and `size` are hexadecimal literals (`0x...`)
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Memory {
    pub region: MemoryRegion,
    pub namespace: String,
    pub start: String,
    pub size: String,
    pub set_by: String,
}

/// One normalized configuration document
#[derive(Debug, Clone, PartialEq, derive_new::new)]
pub struct Source {
    /// Human readable identity, used in diagnostics and errors
    #[new(into)]
    pub origin: String,
    #[new(into)]
    pub namespace: String,
    #[new(default)]
    pub config: Vec<ConfigSetting>,
    #[new(default)]
    pub overrides: Vec<Override>,
    #[new(default)]
    pub macros: BTreeSet<String>,
    #[new(default)]
    pub memories: Vec<Memory>,
    /// Every other top level key of the document
    #[new(default)]
    pub fields: IndexMap<String, Value>,
}

/// Normalize a raw document into a [Source]
///
/// `namespace` is fixed for the target (`"target"`) and the application (`"app"`). Libraries pass `None` and
/// are namespaced by their required `name` field. Only `target_overrides` entries keyed by `"*"` or by one of
/// `labels` are kept; the others are dropped without error.
pub fn prepare(
    document: &serde_json::Value,
    origin: &str,
    namespace: Option<&str>,
    labels: &BTreeSet<String>,
) -> Result<Source, SourceError> {
    let serde_json::Value::Object(document) = document else {
        return Err(SourceError::NotAnObject {
            origin: origin.to_string(),
        });
    };

    let namespace = match namespace {
        Some(namespace) => namespace.to_string(),
        None => match document.get(NAME_KEY) {
            Some(serde_json::Value::String(name)) if !name.is_empty() => name.clone(),
            _ => {
                return Err(SourceError::MissingName {
                    origin: origin.to_string(),
                })
            }
        },
    };

    tracing::debug!(%origin, %namespace, "preparing source");
    let mut source = Source::new(origin, namespace);

    if let Some(config) = document.get(CONFIG_KEY) {
        for (key, entry) in section(config, origin, CONFIG_KEY)? {
            let setting = config_setting(&source, key, entry)?;
            source.config.push(setting);
        }
    }

    // memory keys at the top level may be replaced by overrides of the same document
    let mut memory_values: IndexMap<&str, &serde_json::Value> = document
        .iter()
        .filter(|(key, _)| MemoryRegion::is_memory_key(key))
        .map(|(key, value)| (key.as_str(), value))
        .collect();

    for (key, value) in applicable_overrides(document, origin, labels)? {
        let (override_namespace, name) = split_key(&source.namespace, key, origin)?;
        if MemoryRegion::is_memory_key(name) {
            memory_values.insert(name, value);
            continue;
        }

        let (name, modifier) = Modifier::split(name);
        source.overrides.push(Override {
            namespace: override_namespace.to_string(),
            name: name.to_string(),
            value: value.into(),
            modifier,
        });
    }

    source.memories = memories(&source, &memory_values)?;

    if let Some(macros) = document.get(MACROS_KEY) {
        source.macros = string_list(macros).ok_or_else(|| SourceError::InvalidSection {
            origin: origin.to_string(),
            section: MACROS_KEY.to_string(),
            expected: "a list of strings",
        })?;
    }

    for (key, value) in document {
        let reserved = [
            NAME_KEY,
            CONFIG_KEY,
            OVERRIDES_KEY,
            TARGET_OVERRIDES_KEY,
            MACROS_KEY,
        ];
        if reserved.contains(&key.as_str()) || MemoryRegion::is_memory_key(key) {
            continue;
        }
        source.fields.insert(key.clone(), value.into());
    }

    Ok(source)
}

fn section<'a>(
    value: &'a serde_json::Value,
    origin: &str,
    name: &str,
) -> Result<&'a serde_json::Map<String, serde_json::Value>, SourceError> {
    value.as_object().ok_or_else(|| SourceError::InvalidSection {
        origin: origin.to_string(),
        section: name.to_string(),
        expected: "an object",
    })
}

fn string_list(value: &serde_json::Value) -> Option<BTreeSet<String>> {
    value
        .as_array()?
        .iter()
        .map(|element| element.as_str().map(str::to_string))
        .collect()
}

/// Split `ns.name` at the first dot; keys without a dot belong to `namespace`
fn split_key<'a>(
    namespace: &'a str,
    key: &'a str,
    origin: &str,
) -> Result<(&'a str, &'a str), SourceError> {
    let (namespace, name) = key.split_once('.').unwrap_or((namespace, key));
    if namespace.is_empty() || name.is_empty() || name.starts_with('.') {
        return Err(SourceError::InvalidKey {
            origin: origin.to_string(),
            key: key.to_string(),
        });
    }

    Ok((namespace, name))
}

fn config_setting(
    source: &Source,
    key: &str,
    entry: &serde_json::Value,
) -> Result<ConfigSetting, SourceError> {
    let (namespace, name) = split_key(&source.namespace, key, &source.origin)?;
    tracing::trace!(%namespace, %name, "extracting config setting");

    let (value, help_text, macro_name) = match entry {
        serde_json::Value::Object(entry) => (
            entry.get("value").map(Value::from).unwrap_or(Value::Null),
            entry.get("help").and_then(|h| h.as_str()).map(str::to_string),
            entry
                .get("macro_name")
                .and_then(|m| m.as_str())
                .map(str::to_string),
        ),
        scalar => (scalar.into(), None, None),
    };

    Ok(ConfigSetting {
        namespace: namespace.to_string(),
        name: name.to_string(),
        value,
        help_text,
        macro_name,
        set_by: source.origin.clone(),
    })
}

/// Flatten the unconditional `overrides` section and every applicable `target_overrides` entry
///
/// Later entries replace earlier ones with the same key.
fn applicable_overrides<'a>(
    document: &'a serde_json::Map<String, serde_json::Value>,
    origin: &str,
    labels: &BTreeSet<String>,
) -> Result<IndexMap<&'a str, &'a serde_json::Value>, SourceError> {
    let mut flattened = IndexMap::new();

    if let Some(overrides) = document.get(OVERRIDES_KEY) {
        for (key, value) in section(overrides, origin, OVERRIDES_KEY)? {
            flattened.insert(key.as_str(), value);
        }
    }

    if let Some(target_overrides) = document.get(TARGET_OVERRIDES_KEY) {
        for (label, overrides) in section(target_overrides, origin, TARGET_OVERRIDES_KEY)? {
            if label != WILDCARD_LABEL && !labels.contains(label) {
                tracing::trace!(%origin, %label, "skipping target overrides for inactive label");
                continue;
            }

            for (key, value) in section(overrides, origin, TARGET_OVERRIDES_KEY)? {
                flattened.insert(key.as_str(), value);
            }
        }
    }

    Ok(flattened)
}

fn memories(
    source: &Source,
    values: &IndexMap<&str, &serde_json::Value>,
) -> Result<Vec<Memory>, SourceError> {
    let mut memories = vec![];

    for region in MemoryRegion::ALL {
        let start = values.get(region.start_key()).copied();
        let size = values.get(region.size_key()).copied();

        match (start, size) {
            (Some(start), Some(size)) => {
                let memory = Memory {
                    region,
                    namespace: source.namespace.clone(),
                    start: hex_literal(source, region.start_key(), start)?,
                    size: hex_literal(source, region.size_key(), size)?,
                    set_by: source.origin.clone(),
                };
                tracing::debug!(namespace=%source.namespace, %region, start=%memory.start, size=%memory.size, "extracted memory region");
                memories.push(memory);
            }
            (None, None) => {}
            (start, _) => {
                let (defined, missing) = if start.is_some() {
                    (region.start_key(), region.size_key())
                } else {
                    (region.size_key(), region.start_key())
                };
                return Err(SourceError::IncompleteMemory {
                    origin: source.origin.clone(),
                    namespace: source.namespace.clone(),
                    defined: defined.to_uppercase(),
                    missing: missing.to_uppercase(),
                });
            }
        }
    }

    Ok(memories)
}

/// Accepts JSON integers, decimal strings and `0x` prefixed hexadecimal strings
fn hex_literal(
    source: &Source,
    key: &str,
    value: &serde_json::Value,
) -> Result<String, SourceError> {
    let parsed = match value {
        serde_json::Value::Number(number) => number.as_u64(),
        serde_json::Value::String(text) => parse_integer(text.trim()),
        _ => None,
    };

    parsed
        .map(|number| format!("{number:#x}"))
        .ok_or_else(|| SourceError::InvalidMemoryValue {
            origin: source.origin.clone(),
            namespace: source.namespace.clone(),
            key: key.to_string(),
            value: value.to_string(),
        })
}

fn parse_integer(text: &str) -> Option<u64> {
    match text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum SourceError {
    #[error("{origin}: document must be a JSON object")]
    NotAnObject { origin: String },
    #[error("{origin}: library document is missing the required 'name' field")]
    MissingName { origin: String },
    #[error("{origin}: invalid configuration key '{key}'")]
    InvalidKey { origin: String, key: String },
    #[error("{origin}: section '{section}' must be {expected}")]
    InvalidSection {
        origin: String,
        section: String,
        expected: &'static str,
    },
    #[error("{origin}: {defined} and {missing} must be defined together. Only {defined} is defined in '{namespace}'")]
    IncompleteMemory {
        origin: String,
        namespace: String,
        defined: String,
        missing: String,
    },
    #[error("{origin}: '{key}' in '{namespace}' is not a valid integer: {value}")]
    InvalidMemoryValue {
        origin: String,
        namespace: String,
        key: String,
        value: String,
    },
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn labels(labels: &[&str]) -> BTreeSet<String> {
        labels.iter().map(|l| l.to_string()).collect()
    }

    fn prepare_lib(document: serde_json::Value, active: &[&str]) -> Result<Source, SourceError> {
        prepare(&document, "File: mbed_lib.json", None, &labels(active))
    }

    #[test]
    fn config_keys_are_namespaced() {
        let source = prepare_lib(
            json!({
                "name": "lib",
                "config": {
                    "plain": 1,
                    "other.foreign": "x",
                    "described": {"help": "some help", "value": true, "macro_name": "DESCRIBED"},
                    "undefined": {"help": "no value"}
                }
            }),
            &[],
        )
        .unwrap();

        let keys: Vec<String> = source.config.iter().map(|c| c.key().to_string()).collect();
        assert_eq!(
            keys,
            ["lib.plain", "other.foreign", "lib.described", "lib.undefined"]
        );

        let described = &source.config[2];
        assert_eq!(described.value, Value::Boolean(true));
        assert_eq!(described.help_text.as_deref(), Some("some help"));
        assert_eq!(described.macro_name(), "DESCRIBED");
        assert_eq!(source.config[3].value, Value::Null);
        assert_eq!(source.config[0].macro_name(), "MBED_CONF_LIB_PLAIN");
    }

    #[test]
    fn explicit_namespace_wins_over_name() {
        let source = prepare(
            &json!({"name": "ignored", "config": {"a": 1}}),
            "app",
            Some(APP_NAMESPACE),
            &BTreeSet::new(),
        )
        .unwrap();
        assert_eq!(source.namespace, "app");
        assert_eq!(source.config[0].key().to_string(), "app.a");
    }

    #[test]
    fn library_without_name_is_rejected() {
        let err = prepare_lib(json!({"config": {"a": 1}}), &[]).unwrap_err();
        assert_eq!(
            err,
            SourceError::MissingName {
                origin: "File: mbed_lib.json".to_string()
            }
        );
    }

    #[test]
    fn target_overrides_are_filtered_by_label() {
        let document = json!({
            "name": "lib",
            "target_overrides": {
                "*": {"a": 1, "b": 1},
                "K64F": {"b": 2, "target.features_add": ["BLE"]},
                "NRF52": {"c": 3}
            }
        });

        let source = prepare_lib(document.clone(), &["K64F"]).unwrap();
        let overrides: Vec<(String, Value, Modifier)> = source
            .overrides
            .iter()
            .map(|o| (o.key().to_string(), o.value.clone(), o.modifier))
            .collect();
        assert_eq!(
            overrides,
            vec![
                ("lib.a".to_string(), Value::Integer(1), Modifier::Set),
                ("lib.b".to_string(), Value::Integer(2), Modifier::Set),
                (
                    "target.features".to_string(),
                    ["BLE"].into_iter().collect::<Value>(),
                    Modifier::Add
                ),
            ]
        );

        let without_labels = prepare_lib(document, &[]).unwrap();
        assert_eq!(without_labels.overrides.len(), 2);
    }

    #[test]
    fn modifiers() {
        assert_eq!(Modifier::split("device_has_add"), ("device_has", Modifier::Add));
        assert_eq!(Modifier::split("device_has_remove"), ("device_has", Modifier::Remove));
        assert_eq!(Modifier::split("device_has"), ("device_has", Modifier::Set));
    }

    #[test]
    fn memory_overrides_become_memories() {
        let source = prepare_lib(
            json!({
                "name": "boot",
                "mbed_rom_start": "0",
                "mbed_rom_size": "1024",
                "target_overrides": {
                    "*": {"target.mbed_ram_start": "0x20000000", "target.mbed_ram_size": 65536},
                    "K64F": {"target.mbed_rom_size": "0X800"}
                }
            }),
            &["K64F"],
        )
        .unwrap();

        assert!(source.overrides.is_empty());
        assert!(source.fields.is_empty());
        assert_eq!(
            source.memories,
            vec![
                Memory {
                    region: MemoryRegion::Ram,
                    namespace: "boot".to_string(),
                    start: "0x20000000".to_string(),
                    size: "0x10000".to_string(),
                    set_by: "File: mbed_lib.json".to_string(),
                },
                Memory {
                    region: MemoryRegion::Rom,
                    namespace: "boot".to_string(),
                    start: "0x0".to_string(),
                    size: "0x800".to_string(),
                    set_by: "File: mbed_lib.json".to_string(),
                },
            ]
        );
    }

    #[test]
    fn memory_start_without_size_is_fatal() {
        let err = prepare_lib(
            json!({"name": "boot", "target_overrides": {"*": {"target.mbed_ram_start": "0x0"}}}),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, SourceError::IncompleteMemory { .. }));
        assert!(err.to_string().contains("MBED_RAM_SIZE"));
    }

    #[test]
    fn memory_value_must_be_an_integer() {
        let err = prepare_lib(
            json!({"name": "boot", "mbed_ram_start": "zero", "mbed_ram_size": "0x10"}),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, SourceError::InvalidMemoryValue { .. }));
    }

    #[test]
    fn macros_and_fields() {
        let source = prepare(
            &json!({
                "labels": ["A", "B"],
                "core": "Cortex-M4",
                "macros": ["FOO", "BAR=1", "FOO"],
                "config": {},
            }),
            "target",
            Some(TARGET_NAMESPACE),
            &BTreeSet::new(),
        )
        .unwrap();

        assert_eq!(source.macros, labels(&["BAR=1", "FOO"]));
        assert_eq!(source.fields["labels"], ["A", "B"].into_iter().collect::<Value>());
        assert_eq!(source.fields["core"], Value::from("Cortex-M4"));
        assert!(!source.fields.contains_key("config"));
    }

    #[test]
    fn macros_must_be_strings() {
        let err = prepare_lib(json!({"name": "lib", "macros": [1]}), &[]).unwrap_err();
        assert!(matches!(err, SourceError::InvalidSection { .. }));
    }

    #[test]
    fn empty_namespace_is_invalid() {
        let err = prepare_lib(json!({"name": "lib", "config": {".x": 1}}), &[]).unwrap_err();
        assert!(matches!(err, SourceError::InvalidKey { .. }));
    }

    #[test]
    fn empty_name_is_invalid() {
        for key in ["a.", "a..b"] {
            let err = prepare_lib(json!({"name": "lib", "config": {key: 1}}), &[]).unwrap_err();
            assert!(matches!(err, SourceError::InvalidKey { .. }), "{key}");

            let err = prepare_lib(
                json!({"name": "lib", "target_overrides": {"*": {key: 1}}}),
                &[],
            )
            .unwrap_err();
            assert!(matches!(err, SourceError::InvalidKey { .. }), "{key}");
        }
    }

    #[test]
    fn target_overrides_section_is_unconditional() {
        let source = prepare(
            &json!({"config": {"a": {"value": 1}}, "overrides": {"a": 2}}),
            "target",
            Some(TARGET_NAMESPACE),
            &BTreeSet::new(),
        )
        .unwrap();
        assert_eq!(source.overrides[0].key().to_string(), "target.a");
        assert_eq!(source.overrides[0].value, Value::Integer(2));
    }

    #[test]
    fn presence_marker() {
        let source = prepare_lib(json!({"name": "ble", "config": {"present": 1}}), &[]).unwrap();
        assert!(source.config[0].is_presence_marker());
    }

    #[test]
    fn default_macro_names() {
        assert_eq!(
            default_macro_name("platform", "stdio-baud-rate"),
            "MBED_CONF_PLATFORM_STDIO_BAUD_RATE"
        );
        assert_eq!(default_macro_name("a", "b.c"), "MBED_CONF_A_B_C");
    }
}
