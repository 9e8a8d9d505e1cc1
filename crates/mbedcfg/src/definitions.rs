//! Compiler definitions derived from a resolved [Config]
//!
//! This is the view code generators consume. Every part of the configuration becomes a `NAME` or
//! `NAME=VALUE` preprocessor definition:
//!
//! | source                     | definition                                    |
//! |----------------------------|-----------------------------------------------|
//! | labels, extra labels       | `TARGET_<LABEL>`                              |
//! | features                   | `FEATURE_<FEATURE>=1`                         |
//! | components                 | `COMPONENT_<COMPONENT>=1`                     |
//! | device capabilities        | `DEVICE_<CAPABILITY>=1`                       |
//! | settings                   | explicit `macro_name` or `MBED_CONF_<NS>_<NAME>` |
//! | macros                     | verbatim                                      |
//! | memory regions             | `MBED_<REGION>_START`, `MBED_<REGION>_SIZE`   |
use crate::config::Config;
use crate::source::SettingKey;
use std::collections::BTreeSet;

/// One `NAME` or `NAME=VALUE` definition
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, derive_new::new)]
pub struct Definition {
    #[new(into)]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Definition {
    /// Split a macro at its first `=`
    pub fn parse(definition: &str) -> Self {
        match definition.split_once('=') {
            Some((name, value)) => Self::new(name, Some(value.to_string())),
            None => Self::new(definition, None),
        }
    }

    fn flag(name: String) -> Self {
        Self::new(name, Some("1".to_string()))
    }
}

impl std::fmt::Display for Definition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.name, value),
            None => f.write_str(&self.name),
        }
    }
}

/// A config setting rendered as a definition, with its provenance
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SettingDefinition {
    pub key: SettingKey,
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    pub set_by: String,
}

impl SettingDefinition {
    pub fn definition(&self) -> Definition {
        Definition::new(&self.name, Some(self.value.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Default, serde::Serialize)]
pub struct Definitions {
    pub labels: Vec<Definition>,
    pub features: Vec<Definition>,
    pub components: Vec<Definition>,
    pub device_has: Vec<Definition>,
    pub settings: Vec<SettingDefinition>,
    pub macros: Vec<Definition>,
    pub memories: Vec<Definition>,
}

impl Definitions {
    pub fn new(config: &Config) -> Self {
        let labels: BTreeSet<&String> = config
            .labels()
            .iter()
            .chain(config.extra_labels())
            .collect();

        let mut settings: Vec<SettingDefinition> = config
            .settings()
            .filter(|setting| !setting.value.is_null())
            .map(|setting| SettingDefinition {
                key: setting.key(),
                name: setting.macro_name(),
                value: setting.value.to_string(),
                help: setting.help_text.clone(),
                set_by: setting.set_by.clone(),
            })
            .collect();
        settings.sort_by(|a, b| a.key.cmp(&b.key));

        let mut memories: Vec<_> = config.memories().iter().collect();
        memories.sort_by_key(|memory| memory.region);

        Self {
            labels: labels
                .into_iter()
                .map(|label| Definition::new(format!("TARGET_{label}"), None))
                .collect(),
            features: prefixed_flags("FEATURE", config.features()),
            components: prefixed_flags("COMPONENT", config.components()),
            device_has: prefixed_flags("DEVICE", config.device_has()),
            settings,
            macros: config
                .macros()
                .iter()
                .map(|m| Definition::parse(m))
                .collect(),
            memories: memories
                .into_iter()
                .flat_map(|memory| {
                    [
                        Definition::new(
                            format!("MBED_{}_START", memory.region),
                            Some(memory.start.clone()),
                        ),
                        Definition::new(
                            format!("MBED_{}_SIZE", memory.region),
                            Some(memory.size.clone()),
                        ),
                    ]
                })
                .collect(),
        }
    }

    /// Every definition in emission order
    pub fn iter(&self) -> impl Iterator<Item = Definition> + '_ {
        self.labels
            .iter()
            .chain(&self.features)
            .chain(&self.components)
            .chain(&self.device_has)
            .cloned()
            .chain(self.settings.iter().map(SettingDefinition::definition))
            .chain(self.macros.iter().cloned())
            .chain(self.memories.iter().cloned())
    }
}

impl From<&Config> for Definitions {
    fn from(config: &Config) -> Self {
        Self::new(config)
    }
}

fn prefixed_flags(prefix: &str, values: &BTreeSet<String>) -> Vec<Definition> {
    values
        .iter()
        .map(|value| Definition::flag(format!("{prefix}_{value}")))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::source::{prepare, TARGET_NAMESPACE};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config(document: serde_json::Value) -> Config {
        let source = prepare(&document, "target", Some(TARGET_NAMESPACE), &Default::default())
            .unwrap();
        Config::from_sources([source]).unwrap()
    }

    #[test]
    fn parse_macros() {
        assert_eq!(Definition::parse("NAME"), Definition::new("NAME", None));
        assert_eq!(
            Definition::parse("NAME=a=b"),
            Definition::new("NAME", Some("a=b".to_string()))
        );
        assert_eq!(Definition::parse("NAME=a=b").to_string(), "NAME=a=b");
    }

    #[test]
    fn labels_and_flags() {
        let definitions = Definitions::new(&config(json!({
            "labels": ["K64F", "CORTEX_M"],
            "extra_labels": ["Freescale", "K64F"],
            "features": ["BLE"],
            "components": ["SD"],
            "device_has": ["SERIAL", "ANALOGIN"]
        })));

        let rendered: Vec<String> = definitions.iter().map(|d| d.to_string()).collect();
        assert_eq!(
            rendered,
            [
                "TARGET_CORTEX_M",
                "TARGET_Freescale",
                "TARGET_K64F",
                "FEATURE_BLE=1",
                "COMPONENT_SD=1",
                "DEVICE_ANALOGIN=1",
                "DEVICE_SERIAL=1",
            ]
        );
    }

    #[test]
    fn settings_are_sorted_and_null_settings_omitted() {
        let definitions = Definitions::new(&config(json!({
            "config": {
                "zeta": {"value": 3, "help": "last"},
                "alpha-value": true,
                "unset": {"help": "no value"},
                "named": {"value": "\"text\"", "macro_name": "CUSTOM_NAME"},
                "other.list": ["b", "a"]
            }
        })));

        let rendered: Vec<String> = definitions
            .settings
            .iter()
            .map(|s| s.definition().to_string())
            .collect();
        assert_eq!(
            rendered,
            [
                "MBED_CONF_OTHER_LIST=a,b",
                "MBED_CONF_TARGET_ALPHA_VALUE=1",
                "CUSTOM_NAME=\"text\"",
                "MBED_CONF_TARGET_ZETA=3",
            ]
        );
        assert_eq!(definitions.settings[3].help.as_deref(), Some("last"));
    }

    #[test]
    fn macros_and_memories() {
        let definitions = Definitions::new(&config(json!({
            "macros": ["B=2", "A"],
            "mbed_rom_start": "0", "mbed_rom_size": "1048576",
            "mbed_ram_start": "0x20000000", "mbed_ram_size": "0x30000"
        })));

        let rendered: Vec<String> = definitions.iter().map(|d| d.to_string()).collect();
        assert_eq!(
            rendered,
            [
                "A",
                "B=2",
                "MBED_RAM_START=0x20000000",
                "MBED_RAM_SIZE=0x30000",
                "MBED_ROM_START=0x0",
                "MBED_ROM_SIZE=0x100000",
            ]
        );
    }
}
