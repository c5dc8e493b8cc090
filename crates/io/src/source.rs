// Document source over raw file text
//
// Holds the text of definition and instance files and parses a document the
// first time it is asked for. Format errors surface as `LoadError::Malformed`
// for that id only.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use profilestack_engine::{Category, Document, DocumentSource, LoadError};

use crate::definition::parse_definition;
use crate::error::FormatError;
use crate::instance::parse_instance;

pub const DEFINITION_SUFFIX: &str = ".def.json";
pub const INSTANCE_SUFFIX: &str = ".inst.cfg";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Definition,
    Instance,
}

impl DocumentFormat {
    /// Split a file name into document id and format.
    pub fn from_file_name(file_name: &str) -> Option<(&str, DocumentFormat)> {
        if let Some(id) = file_name.strip_suffix(DEFINITION_SUFFIX) {
            Some((id, DocumentFormat::Definition))
        } else {
            file_name
                .strip_suffix(INSTANCE_SUFFIX)
                .map(|id| (id, DocumentFormat::Instance))
        }
    }

    pub fn parse(&self, id: &str, text: &str) -> Result<Document, FormatError> {
        match self {
            DocumentFormat::Definition => parse_definition(id, text),
            DocumentFormat::Instance => parse_instance(id, text),
        }
    }
}

#[derive(Default)]
pub struct TextSource {
    texts: BTreeMap<String, (DocumentFormat, String)>,
    parsed: Mutex<BTreeMap<String, Result<Arc<Document>, LoadError>>>,
}

impl TextSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, format: DocumentFormat, text: impl Into<String>) {
        let id = id.into();
        self.parsed.get_mut().remove(&id);
        self.texts.insert(id, (format, text.into()));
    }

    /// Add a file by name. Returns false for names that are neither
    /// definitions nor instance containers.
    pub fn insert_file(&mut self, file_name: &str, text: impl Into<String>) -> bool {
        match DocumentFormat::from_file_name(file_name) {
            Some((id, format)) => {
                self.insert(id, format, text);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    fn parse(&self, id: &str) -> Result<Arc<Document>, LoadError> {
        if let Some(result) = self.parsed.lock().get(id) {
            return result.clone();
        }

        let (format, text) = self
            .texts
            .get(id)
            .ok_or_else(|| LoadError::NotFound { id: id.to_string() })?;
        let result = format.parse(id, text).map(Arc::new).map_err(|e| {
            log::warn!("cannot parse '{}': {}", id, e);
            e.into_load_error(id)
        });
        self.parsed.lock().insert(id.to_string(), result.clone());
        result
    }
}

impl DocumentSource for TextSource {
    fn load_document(&self, id: &str) -> Result<Arc<Document>, LoadError> {
        self.parse(id)
    }

    fn list_documents(&self, category: Category) -> Vec<String> {
        // Unparseable documents have no known category and are left out
        self.texts
            .keys()
            .filter(|id| matches!(self.parse(id), Ok(doc) if doc.category == category))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> TextSource {
        let mut source = TextSource::new();
        assert!(source.insert_file("fdmprinter.def.json", r#"{ "name": "FFF" }"#));
        assert!(source.insert_file("draft.inst.cfg", "[metadata]\ntype = quality\n[values]\nlayer_height = 0.3\n"));
        assert!(source.insert_file("broken.inst.cfg", "[values\n"));
        assert!(!source.insert_file("readme.txt", "hello"));
        source
    }

    #[test]
    fn test_file_names_map_to_ids() {
        assert_eq!(
            DocumentFormat::from_file_name("creality_base.def.json"),
            Some(("creality_base", DocumentFormat::Definition))
        );
        assert_eq!(
            DocumentFormat::from_file_name("My Ender_user.inst.cfg"),
            Some(("My Ender_user", DocumentFormat::Instance))
        );
        assert_eq!(DocumentFormat::from_file_name("machine.global.cfg"), None);
    }

    #[test]
    fn test_load_parses_once() {
        let source = source();
        assert_eq!(source.len(), 3);
        let first = source.load_document("draft").unwrap();
        let second = source.load_document("draft").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.category, Category::Quality);
    }

    #[test]
    fn test_errors_by_id() {
        let source = source();
        assert_eq!(
            source.load_document("nope").unwrap_err(),
            LoadError::NotFound { id: "nope".into() }
        );
        assert!(matches!(
            source.load_document("broken"),
            Err(LoadError::Malformed { id, .. }) if id == "broken"
        ));
    }

    #[test]
    fn test_list_by_category() {
        let source = source();
        assert_eq!(source.list_documents(Category::Quality), vec!["draft"]);
        assert_eq!(source.list_documents(Category::Definition), vec!["fdmprinter"]);
        assert!(source.list_documents(Category::User).is_empty());
    }
}
