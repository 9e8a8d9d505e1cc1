//! collection of decoded configuration documents (JSON value and path to source file)
//!
//! [Documents] tracks every document read during one resolution, keyed by its path. A document is decoded at
//! most once: later lookups of the same path return the cached value. Once added a document is never removed.
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

#[derive(Default, Debug)]
pub struct Documents {
    documents: IndexMap<PathBuf, serde_json::Value>,
}

impl Documents {
    /// Inserts an already decoded document
    ///
    /// Replaces any document previously stored under the same path.
    pub fn insert(&mut self, path: impl Into<PathBuf>, document: serde_json::Value) {
        self.documents.insert(path.into(), document);
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl Documents {
    /// Returns the document stored for `path`, decoding it from disk the first time it is requested
    pub fn load_file(&mut self, path: &Path) -> Result<&serde_json::Value, LoadError> {
        if let Some(index) = self.documents.get_index_of(path) {
            return Ok(&self.documents[index]);
        }

        let document = read_document(path)?;
        let (index, _) = self.documents.insert_full(path.to_path_buf(), document);
        Ok(&self.documents[index])
    }
}

/// Read and decode a single JSON document, without caching
pub fn read_document(path: &Path) -> Result<serde_json::Value, LoadError> {
    tracing::info!(path=%path.display(), "loading file");

    let contents = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| LoadError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("Unable to read '{}'", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to decode JSON data in the file located at '{}'", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Utility macro to create [Documents]
///
/// ```
/// # use mbedcfg::documents;
/// # use serde_json::json;
/// let documents = documents! {
///   "lib/mbed_lib.json" => json!({"name": "lib"}),
///   "lib/TARGET_K64F/mbed_lib.json" => json!({"name": "k64f"})
/// };
/// assert_eq!(documents.len(), 2);
/// ```
#[macro_export]
macro_rules! documents {
    { $($path:expr => $document:expr),+ $(,)? } => {{
        let mut docs = $crate::documents::Documents::default();
        $(
            docs.insert($path, $document);
        )+

        docs
    }};
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn inserted_documents_are_not_loaded_from_disk() {
        let mut documents = documents! {
            "does/not/exist/mbed_lib.json" => json!({"name": "virtual"}),
        };

        let document = documents
            .load_file(Path::new("does/not/exist/mbed_lib.json"))
            .expect("cached document");
        assert_eq!(document, &json!({"name": "virtual"}));
    }

    #[test]
    fn load_file_decodes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mbed_lib.json");
        std::fs::write(&path, r#"{"name": "lib", "config": {"a": 1}}"#).unwrap();

        let mut documents = Documents::default();
        assert!(documents.is_empty());
        assert_eq!(documents.load_file(&path).unwrap()["name"], json!("lib"));

        // a second load does not observe changes on disk
        std::fs::write(&path, r#"{"name": "changed"}"#).unwrap();
        assert_eq!(documents.load_file(&path).unwrap()["name"], json!("lib"));
        assert_eq!(documents.len(), 1);
    }

    #[test]
    fn malformed_json_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mbed_app.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = Documents::default().load_file(&path).unwrap_err();
        assert!(matches!(err, LoadError::Json { .. }));
        assert!(err.to_string().contains("mbed_app.json"));
    }

    #[test]
    fn missing_file() {
        let err = Documents::default()
            .load_file(Path::new("/definitely/missing/mbed_lib.json"))
            .unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }
}
