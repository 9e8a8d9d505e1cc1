//! # mbedcfg - firmware build configuration resolver
//!
//! Resolves the configuration of a firmware build from a target description, the `mbed_lib.json` documents
//! of every library in the source tree and an optional `mbed_app.json`.
//!
//! ## Introduction for developers
//!
//! Read this to understand how `mbedcfg` works internally.
//!
//! ### Documents
//!
//! Three kinds of JSON documents take part in a resolution:
//!
//! ```json
//! {
//!   "name": "events",
//!   "config": {
//!     "shared-stacksize": {"help": "Stack size of the shared event queue", "value": 2048},
//!     "use-lowpower-timer": false
//!   },
//!   "target_overrides": {
//!     "*": {"target.features_add": ["BLE"]},
//!     "K64F": {"shared-stacksize": 4096}
//!   },
//!   "macros": ["EVENTS_TRACE=1"],
//!   "requires": ["platform"]
//! }
//! ```
//!
//! - target attributes, namespace `target`, flattened from a `targets.json` database by [targets::TargetDatabase]
//! - library documents, one `mbed_lib.json` per library, namespaced by their `name`
//! - the application document `mbed_app.json`, namespace `app`
//!
//! Decoded documents are kept in [documents::Documents] so each file is read at most once per resolution.
//!
//! ### Normalizing
//!
//! see [source::prepare]
//!
//! A raw document becomes a [source::Source]:
//!
//! - every key of `config` is namespaced (`shared-stacksize` in library `events` is `events.shared-stacksize`)
//! - `target_overrides` are filtered by the current labels, `*` always applies
//! - `_add` / `_remove` suffixes of override keys become a [source::Modifier]
//! - `mbed_{ram,rom}_{start,size}` become [source::Memory] regions with hexadecimal values
//!
//! ### Merging
//!
//! see [config::Config::insert]
//!
//! Sources are merged section by section ([config::Section]). Settings can only be defined once, overrides
//! change settings and cumulative fields like `features`, and conditions that do not abort the build are
//! collected as [diagnostics::Warning]s.
//!
//! ### Resolving
//!
//! see [assemble::assemble_config]
//!
//! Which libraries are part of the build depends on path labels such as `TARGET_K64F`, `FEATURE_BLE` or
//! `COMPONENT_SD` ([find_files::LabelFilter]), and merging libraries can enable further features and components.
//! The configuration is rebuilt from scratch until the set of labels, features and components stays the same.
//!
//! ### Output
//!
//! The resolved [config::Config] serializes via [serde]. Code generators use [definitions::Definitions] which
//! renders everything as `NAME` or `NAME=VALUE` compiler definitions.
//!
pub mod assemble;
pub mod config;
pub mod definitions;
pub mod diagnostics;
pub mod documents;
pub mod find_files;
pub mod source;
pub mod targets;
pub mod value;
