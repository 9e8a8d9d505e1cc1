//! Target attributes from a `targets.json` database
//!
//! A target definition can `inherits` from any number of parents. Two inheritance orders are used to flatten
//! a target:
//!
//! - overriding attributes (`core`, `c_lib`, ...) are looked up depth-first, the target itself first. The
//!   `config` and `overrides` mappings are merged element by element instead of replaced as a whole.
//! - accumulating attributes ([ACCUMULATING_ATTRIBUTES]) are looked up breadth-first. The closest definition
//!   is the starting point, every `<attribute>_add` and `<attribute>_remove` between it and the target is
//!   applied on top, furthest first.
//!
//! The flattened document is what [crate::assemble::assemble_config] expects as its target.
use crate::documents::{read_document, LoadError};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, VecDeque};
use std::path::Path;

pub const ACCUMULATING_ATTRIBUTES: [&str; 5] =
    ["extra_labels", "macros", "device_has", "features", "components"];

/// Attributes merged per element along the depth-first order
const MERGING_ATTRIBUTES: [&str; 2] = ["config", "overrides"];

const INHERITS: &str = "inherits";
const PUBLIC: &str = "public";

/// Labels implied by a target's `core`
static CORE_LABELS: &[(&str, &[&str])] = &[
    ("Cortex-M0", &["M0", "CORTEX_M", "LIKE_CORTEX_M0", "CORTEX"]),
    ("Cortex-M0+", &["M0P", "CORTEX_M", "LIKE_CORTEX_M0", "CORTEX"]),
    ("Cortex-M1", &["M1", "CORTEX_M", "LIKE_CORTEX_M1", "CORTEX"]),
    ("Cortex-M3", &["M3", "CORTEX_M", "LIKE_CORTEX_M3", "CORTEX"]),
    ("Cortex-M4", &["M4", "CORTEX_M", "RTOS_M4_M7", "LIKE_CORTEX_M4", "CORTEX"]),
    ("Cortex-M4F", &["M4", "CORTEX_M", "RTOS_M4_M7", "LIKE_CORTEX_M4", "CORTEX"]),
    ("Cortex-M7", &["M7", "CORTEX_M", "RTOS_M4_M7", "LIKE_CORTEX_M7", "CORTEX"]),
    ("Cortex-M7F", &["M7", "CORTEX_M", "RTOS_M4_M7", "LIKE_CORTEX_M7", "CORTEX"]),
    ("Cortex-M7FD", &["M7", "CORTEX_M", "RTOS_M4_M7", "LIKE_CORTEX_M7", "CORTEX"]),
    ("Cortex-A9", &["A9", "CORTEX_A", "LIKE_CORTEX_A9", "CORTEX"]),
    ("Cortex-M23", &["M23", "CORTEX_M", "LIKE_CORTEX_M23", "CORTEX"]),
    ("Cortex-M23-NS", &["M23", "M23_NS", "CORTEX_M", "LIKE_CORTEX_M23", "CORTEX"]),
    ("Cortex-M33", &["M33", "CORTEX_M", "LIKE_CORTEX_M33", "CORTEX"]),
    ("Cortex-M33-NS", &["M33", "M33_NS", "CORTEX_M", "LIKE_CORTEX_M33", "CORTEX"]),
    ("Cortex-M33F", &["M33", "CORTEX_M", "LIKE_CORTEX_M33", "CORTEX"]),
    ("Cortex-M33F-NS", &["M33", "M33_NS", "CORTEX_M", "LIKE_CORTEX_M33", "CORTEX"]),
    ("Cortex-M33FE", &["M33", "CORTEX_M", "LIKE_CORTEX_M33", "CORTEX"]),
    ("Cortex-M33FE-NS", &["M33", "M33_NS", "CORTEX_M", "LIKE_CORTEX_M33", "CORTEX"]),
];

pub fn core_labels(core: &str) -> impl Iterator<Item = &'static str> {
    CORE_LABELS
        .iter()
        .find(|(name, _)| *name == core)
        .map(|(_, labels)| *labels)
        .unwrap_or_default()
        .iter()
        .copied()
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetDatabase {
    targets: Map<String, Value>,
}

impl TargetDatabase {
    pub fn load(path: &Path) -> Result<Self, TargetError> {
        Self::from_value(read_document(path)?)
    }

    pub fn from_value(value: Value) -> Result<Self, TargetError> {
        match value {
            Value::Object(targets) => Ok(Self { targets }),
            _ => Err(TargetError::NotAMapping),
        }
    }

    /// Names of every target that can be built
    pub fn public_targets(&self) -> impl Iterator<Item = &str> {
        self.targets
            .iter()
            .filter(|(_, definition)| definition.as_object().is_some_and(is_public))
            .map(|(name, _)| name.as_str())
    }

    /// The flattened attributes of one public target
    pub fn target_attributes(&self, name: &str) -> Result<Value, TargetError> {
        let definition = self.definition(name)?;
        if !is_public(definition) {
            return Err(TargetError::NotFound {
                name: name.to_string(),
            });
        }

        let override_order = self.override_order(name)?;
        let accumulate_order = self.accumulate_order(name)?;
        tracing::debug!(%name, ?override_order, ?accumulate_order, "resolving target");

        let mut attributes = self.overriding_attributes(&override_order)?;

        for attribute in ACCUMULATING_ATTRIBUTES {
            let values = self.accumulated_attribute(attribute, &accumulate_order)?;
            attributes.insert(attribute.to_string(), string_array(values));
        }

        let mut labels: BTreeSet<String> = override_order.iter().map(|t| t.to_string()).collect();
        if let Some(core) = attributes.get("core").and_then(Value::as_str) {
            labels.extend(core_labels(core).map(str::to_string));
        }
        attributes.insert("labels".to_string(), string_array(labels));

        apply_config_overrides(name, &mut attributes)?;
        Ok(Value::Object(attributes))
    }

    fn definition(&self, name: &str) -> Result<&Map<String, Value>, TargetError> {
        match self.targets.get(name) {
            Some(Value::Object(definition)) => Ok(definition),
            Some(_) => Err(TargetError::InvalidAttribute {
                target: name.to_string(),
                attribute: "definition".to_string(),
                expected: "an object",
            }),
            None => Err(TargetError::NotFound {
                name: name.to_string(),
            }),
        }
    }

    fn parents<'a>(&'a self, name: &str) -> Result<Vec<&'a str>, TargetError> {
        let definition = self.definition(name)?;
        let Some(inherits) = definition.get(INHERITS) else {
            return Ok(vec![]);
        };

        let invalid = || TargetError::InvalidAttribute {
            target: name.to_string(),
            attribute: INHERITS.to_string(),
            expected: "a list of target names",
        };
        let parents = inherits
            .as_array()
            .ok_or_else(invalid)?
            .iter()
            .map(|parent| parent.as_str().ok_or_else(invalid))
            .collect::<Result<Vec<_>, _>>()?;

        for parent in &parents {
            if !self.targets.contains_key(*parent) {
                return Err(TargetError::UnknownParent {
                    target: name.to_string(),
                    parent: parent.to_string(),
                });
            }
        }
        Ok(parents)
    }

    /// The target and all its ancestors, depth-first with the target first
    fn override_order(&self, name: &str) -> Result<Vec<&str>, TargetError> {
        let mut order = vec![];
        let mut chain = vec![];
        self.visit_depth_first(name, &mut chain, &mut order)?;
        Ok(order)
    }

    fn visit_depth_first<'a>(
        &'a self,
        name: &str,
        chain: &mut Vec<String>,
        order: &mut Vec<&'a str>,
    ) -> Result<(), TargetError> {
        if chain.iter().any(|visited| visited == name) {
            return Err(TargetError::Cyclic {
                target: name.to_string(),
            });
        }

        let Some((key, _)) = self.targets.get_key_value(name) else {
            return Err(TargetError::NotFound {
                name: name.to_string(),
            });
        };
        order.push(key.as_str());

        chain.push(name.to_string());
        for parent in self.parents(name)? {
            self.visit_depth_first(parent, chain, order)?;
        }
        chain.pop();
        Ok(())
    }

    /// The target and all its ancestors, breadth-first with the target first
    ///
    /// Must only be called for targets whose hierarchy is known to be acyclic.
    fn accumulate_order(&self, name: &str) -> Result<Vec<&str>, TargetError> {
        let Some((name, _)) = self.targets.get_key_value(name) else {
            return Err(TargetError::NotFound {
                name: name.to_string(),
            });
        };

        let mut order = vec![];
        let mut to_visit = VecDeque::from([name.as_str()]);
        while let Some(current) = to_visit.pop_front() {
            order.push(current);
            to_visit.extend(self.parents(current)?);
        }
        Ok(order)
    }

    fn overriding_attributes(&self, order: &[&str]) -> Result<Map<String, Value>, TargetError> {
        let mut attributes = Map::new();
        for name in order.iter().rev() {
            for (key, value) in self.definition(name)? {
                attributes.insert(key.clone(), value.clone());
            }
        }

        for merging in MERGING_ATTRIBUTES {
            let mut merged = Map::new();
            for name in order.iter().rev() {
                match self.definition(name)?.get(merging) {
                    Some(Value::Object(elements)) => merged.extend(elements.clone()),
                    Some(_) => {
                        return Err(TargetError::InvalidAttribute {
                            target: name.to_string(),
                            attribute: merging.to_string(),
                            expected: "an object",
                        })
                    }
                    None => {}
                }
            }
            if !merged.is_empty() {
                attributes.insert(merging.to_string(), Value::Object(merged));
            }
        }

        attributes.retain(|key, _| !is_non_overriding(key));
        Ok(attributes)
    }

    fn accumulated_attribute(
        &self,
        attribute: &str,
        order: &[&str],
    ) -> Result<Vec<String>, TargetError> {
        let add = format!("{attribute}_add");
        let remove = format!("{attribute}_remove");

        let mut position = None;
        for (index, name) in order.iter().enumerate() {
            if self.definition(name)?.contains_key(attribute) {
                position = Some(index);
                break;
            }
        }
        let Some(position) = position else {
            return Ok(vec![]);
        };

        let mut values = self.string_list(order[position], attribute)?;
        for name in order[..position].iter().rev() {
            let definition = self.definition(name)?;
            if definition.contains_key(&add) {
                values.extend(self.string_list(name, &add)?);
            }
            if definition.contains_key(&remove) {
                let removed = self.string_list(name, &remove)?;
                values.retain(|value| !removed.iter().any(|r| matches_element(r, value)));
            }
        }
        Ok(values)
    }

    fn string_list(&self, name: &str, attribute: &str) -> Result<Vec<String>, TargetError> {
        let invalid = || TargetError::InvalidAttribute {
            target: name.to_string(),
            attribute: attribute.to_string(),
            expected: "a list of strings",
        };
        self.definition(name)?
            .get(attribute)
            .and_then(Value::as_array)
            .ok_or_else(invalid)?
            .iter()
            .map(|value| value.as_str().map(str::to_string).ok_or_else(invalid))
            .collect()
    }
}

fn is_public(definition: &Map<String, Value>) -> bool {
    definition
        .get(PUBLIC)
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

/// Accumulating attributes, their modifiers and the inheritance bookkeeping
fn is_non_overriding(key: &str) -> bool {
    if key == PUBLIC || key == INHERITS {
        return true;
    }
    let base = key
        .strip_suffix("_add")
        .or_else(|| key.strip_suffix("_remove"))
        .unwrap_or(key);
    ACCUMULATING_ATTRIBUTES.contains(&base)
}

/// Removing `NAME` also removes `NAME=VALUE`
fn matches_element(removed: &str, value: &str) -> bool {
    value == removed
        || value
            .strip_prefix(removed)
            .is_some_and(|rest| rest.starts_with('='))
}

fn string_array(values: impl IntoIterator<Item = String>) -> Value {
    Value::Array(values.into_iter().map(Value::String).collect())
}

/// Move the merged `overrides` into the values of `config`
fn apply_config_overrides(
    target: &str,
    attributes: &mut Map<String, Value>,
) -> Result<(), TargetError> {
    let overrides = match attributes.remove("overrides") {
        Some(Value::Object(overrides)) => overrides,
        None => return Ok(()),
        Some(_) => {
            return Err(TargetError::InvalidAttribute {
                target: target.to_string(),
                attribute: "overrides".to_string(),
                expected: "an object",
            })
        }
    };

    let mut config = match attributes.remove("config") {
        Some(Value::Object(config)) => config,
        _ => Map::new(),
    };

    for (key, value) in overrides {
        match config.get_mut(&key) {
            Some(Value::Object(setting)) => {
                setting.insert("value".to_string(), value);
            }
            Some(setting) => *setting = value,
            None => {
                return Err(TargetError::UndefinedOverride {
                    target: target.to_string(),
                    key,
                })
            }
        }
    }

    attributes.insert("config".to_string(), Value::Object(config));
    Ok(())
}

#[derive(thiserror::Error, Debug)]
pub enum TargetError {
    #[error("Unable to load target database")]
    Load(#[from] LoadError),
    #[error("Target database must be a mapping of target names to definitions")]
    NotAMapping,
    #[error("Target attributes for {name} not found")]
    NotFound { name: String },
    #[error("Target {target} inherits from unknown target {parent}")]
    UnknownParent { target: String, parent: String },
    #[error("Target {target} inherits from itself")]
    Cyclic { target: String },
    #[error("Attribute `{attribute}` of target {target} must be {expected}")]
    InvalidAttribute {
        target: String,
        attribute: String,
        expected: &'static str,
    },
    #[error("Target {target} overrides config setting `{key}` which is not defined")]
    UndefinedOverride { target: String, key: String },
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn database(value: Value) -> TargetDatabase {
        TargetDatabase::from_value(value).unwrap()
    }

    #[test]
    fn overriding_attributes_are_depth_first() {
        // D   E
        // |   |
        // B   C
        // |___|
        //   A
        let db = database(json!({
            "A": {"inherits": ["B", "C"]},
            "B": {"inherits": ["D"]},
            "C": {"inherits": ["E"], "c_lib": "small", "core": "Cortex-M4"},
            "D": {"c_lib": "std", "public": false},
            "E": {"core": "Cortex-M0", "default_toolchain": "GCC_ARM"},
        }));

        let attributes = db.target_attributes("A").unwrap();
        // D is reached before C
        assert_eq!(attributes["c_lib"], json!("std"));
        assert_eq!(attributes["core"], json!("Cortex-M4"));
        assert_eq!(attributes["default_toolchain"], json!("GCC_ARM"));
        assert!(attributes.get("inherits").is_none());
        assert!(attributes.get("public").is_none());
    }

    #[test]
    fn config_and_overrides_merge_per_element() {
        let db = database(json!({
            "Child": {
                "inherits": ["Base"],
                "config": {"b": {"value": 2}},
                "overrides": {"a": 10}
            },
            "Base": {
                "config": {"a": {"help": "first", "value": 1}, "b": {"value": 0}},
            },
        }));

        let attributes = db.target_attributes("Child").unwrap();
        assert_eq!(
            attributes["config"],
            json!({"a": {"help": "first", "value": 10}, "b": {"value": 2}})
        );
        assert!(attributes.get("overrides").is_none());
    }

    #[test]
    fn accumulating_attributes_are_breadth_first() {
        let db = database(json!({
            "A": {"inherits": ["B", "C"], "macros_add": ["FROM_A"], "device_has_remove": ["SPI"]},
            "B": {"inherits": ["D"], "device_has_add": ["I2C"]},
            "C": {"macros": ["BASE_MACRO=1", "OTHER"], "device_has": ["SPI", "SERIAL"]},
            "D": {"macros": ["FROM_D"], "macros_remove": ["BASE_MACRO"]},
        }));

        let attributes = db.target_attributes("A").unwrap();
        // breadth-first: A, B, C, D; C is the closest definition of both
        assert_eq!(attributes["macros"], json!(["BASE_MACRO=1", "OTHER", "FROM_A"]));
        assert_eq!(attributes["device_has"], json!(["SERIAL", "I2C"]));
        assert_eq!(attributes["features"], json!([]));
    }

    #[test]
    fn remove_modifier_drops_macros_with_values() {
        let db = database(json!({
            "A": {"inherits": ["Base"], "macros_remove": ["DEBUG"]},
            "Base": {"macros": ["DEBUG=2", "DEBUGGER", "KEEP"]},
        }));

        let attributes = db.target_attributes("A").unwrap();
        assert_eq!(attributes["macros"], json!(["DEBUGGER", "KEEP"]));
    }

    #[test]
    fn labels_include_ancestors_and_core() {
        let db = database(json!({
            "K64F": {"inherits": ["Target"], "core": "Cortex-M4F", "extra_labels": ["Freescale"]},
            "Target": {"public": false},
        }));

        let attributes = db.target_attributes("K64F").unwrap();
        assert_eq!(
            attributes["labels"],
            json!(["CORTEX", "CORTEX_M", "K64F", "LIKE_CORTEX_M4", "M4", "RTOS_M4_M7", "Target"])
        );
        assert_eq!(attributes["extra_labels"], json!(["Freescale"]));
    }

    #[test]
    fn private_and_missing_targets_are_not_found() {
        let db = database(json!({"Base": {"public": false}, "Board": {"inherits": ["Base"]}}));

        assert!(matches!(
            db.target_attributes("Base"),
            Err(TargetError::NotFound { name }) if name == "Base"
        ));
        assert!(matches!(
            db.target_attributes("Nope"),
            Err(TargetError::NotFound { .. })
        ));
        assert_eq!(db.public_targets().collect::<Vec<_>>(), ["Board"]);
    }

    #[test]
    fn broken_hierarchies() {
        let db = database(json!({
            "Loop": {"inherits": ["Other"]},
            "Other": {"inherits": ["Loop"]},
            "Orphan": {"inherits": ["Missing"]},
        }));

        assert!(matches!(
            db.target_attributes("Loop"),
            Err(TargetError::Cyclic { .. })
        ));
        assert!(matches!(
            db.target_attributes("Orphan"),
            Err(TargetError::UnknownParent { parent, .. }) if parent == "Missing"
        ));
    }

    #[test]
    fn overriding_undefined_config_is_fatal() {
        let db = database(json!({"A": {"overrides": {"missing": 1}}}));

        assert!(matches!(
            db.target_attributes("A"),
            Err(TargetError::UndefinedOverride { key, .. }) if key == "missing"
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.json");
        std::fs::write(&path, r#"{"A": {"core": "Cortex-M0"}}"#).unwrap();

        let db = TargetDatabase::load(&path).unwrap();
        assert_eq!(
            db.target_attributes("A").unwrap()["labels"],
            json!(["A", "CORTEX", "CORTEX_M", "LIKE_CORTEX_M0", "M0"])
        );

        std::fs::write(&path, "[]").unwrap();
        assert!(matches!(
            TargetDatabase::load(&path),
            Err(TargetError::NotAMapping)
        ));
    }
}
