//! The template registry: storage, registration, and the 12 retrieval variants
//! of §4.7, plus the process-wide shared singleton of §5/§9.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::ast::{MessagesNode, TextNode};
use crate::metadata::{fallback_language, MetadataCollection, MetadataKind, MetadataValue};

/// The compiled body of a registered template (§3).
#[derive(Debug, Clone)]
pub enum TemplateBody {
    Prompt(TextNode),
    Messages(MessagesNode),
    Plaintext(String),
}

impl TemplateBody {
    pub fn kind_name(&self) -> &'static str {
        match self {
            TemplateBody::Prompt(_) => "text",
            TemplateBody::Messages(_) => "messages",
            TemplateBody::Plaintext(_) => "text",
        }
    }
}

/// A compiled, immutable template plus the metadata it was registered with (§3).
#[derive(Debug, Clone)]
pub struct Template {
    pub body: TemplateBody,
    pub metadata: MetadataCollection,
}

impl Template {
    pub fn new(body: TemplateBody, metadata: MetadataCollection) -> Self {
        Self { body, metadata }
    }

    pub fn identifier(&self) -> Option<&str> {
        self.metadata.identifier()
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LibraryError {
    #[error("template not found for the given metadata constraints")]
    NotFound,
    #[error("a template with equivalent metadata is already registered")]
    DuplicateTemplate,
}

#[derive(Default)]
struct LibraryInner {
    templates: Vec<Arc<Template>>,
    by_value: HashMap<MetadataValue, Vec<Arc<Template>>>,
    available_by_kind: HashMap<MetadataKind, Vec<MetadataValue>>,
}

impl LibraryInner {
    fn is_duplicate(&self, metadata: &MetadataCollection) -> bool {
        self.templates.iter().any(|t| metadata_sets_equal(&t.metadata, metadata))
    }

    fn insert(&mut self, template: Template) {
        let arc = Arc::new(template);
        for kind in [
            MetadataKind::Identifier,
            MetadataKind::Language,
            MetadataKind::TargetModel,
            MetadataKind::TargetModelFamily,
        ] {
            for value in arc.metadata.get_all(kind) {
                self.by_value.entry(value.clone()).or_default().push(arc.clone());
                let bucket = self.available_by_kind.entry(kind).or_default();
                if !bucket.contains(value) {
                    bucket.push(value.clone());
                }
            }
        }
        self.templates.push(arc);
    }

    /// Templates carrying `value` exactly, or (if `use_fallback`) carrying a
    /// fallback substitute drawn from the library's known values of that type (§4.7).
    fn carrying(&self, value: &MetadataValue, use_fallback: bool) -> Vec<Arc<Template>> {
        if let Some(direct) = self.by_value.get(value) {
            if !direct.is_empty() {
                return direct.clone();
            }
        }
        if !use_fallback {
            return Vec::new();
        }
        match value {
            MetadataValue::Language(target) => {
                let available: Vec<_> = self
                    .available_by_kind
                    .get(&MetadataKind::Language)
                    .into_iter()
                    .flatten()
                    .filter_map(|v| match v {
                        MetadataValue::Language(l) => Some(l.clone()),
                        _ => None,
                    })
                    .collect();
                match fallback_language(target, &available) {
                    Some(picked) => self
                        .by_value
                        .get(&MetadataValue::Language(picked.clone()))
                        .cloned()
                        .unwrap_or_default(),
                    None => Vec::new(),
                }
            }
            _ => Vec::new(),
        }
    }
}

fn metadata_sets_equal(a: &MetadataCollection, b: &MetadataCollection) -> bool {
    for kind in [
        MetadataKind::Identifier,
        MetadataKind::Language,
        MetadataKind::TargetModel,
        MetadataKind::TargetModelFamily,
    ] {
        if a.get_all(kind) != b.get_all(kind) {
            return false;
        }
    }
    true
}

fn intersect(a: &[Arc<Template>], b: &[Arc<Template>]) -> Vec<Arc<Template>> {
    a.iter().filter(|t| b.iter().any(|u| Arc::ptr_eq(t, u))).cloned().collect()
}

/// A debug/introspection snapshot of a registered template (ambient JSON surface).
#[derive(Debug, Clone, serde::Serialize)]
pub struct TemplateDescriptor {
    pub identifier: Option<String>,
    pub kind: &'static str,
    pub languages: Vec<String>,
    pub models: Vec<String>,
}

/// The template registry (§3). All structural mutation and retrieval run under a
/// single library-wide mutex (§5).
#[derive(Default)]
pub struct TemplateLibrary {
    inner: Mutex<LibraryInner>,
}

impl std::fmt::Debug for TemplateLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.inner.lock().expect("library mutex poisoned").templates.len();
        f.debug_struct("TemplateLibrary").field("templates", &count).finish()
    }
}

impl TemplateLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, template: Template) -> Result<(), LibraryError> {
        let mut inner = self.inner.lock().expect("library mutex poisoned");
        if inner.is_duplicate(&template.metadata) {
            return Err(LibraryError::DuplicateTemplate);
        }
        tracing::debug!(identifier = ?template.identifier(), "registering template");
        inner.insert(template);
        Ok(())
    }

    pub fn try_add(&self, template: Template) -> bool {
        self.add(template).is_ok()
    }

    pub fn add_range(&self, templates: Vec<Template>) -> Result<(), LibraryError> {
        for t in templates {
            self.add(t)?;
        }
        Ok(())
    }

    pub fn try_add_range(&self, templates: Vec<Template>) -> usize {
        templates.into_iter().filter(|t| self.try_add(t.clone())).count()
    }

    fn constraints_with_identifier(identifier: &str, rest: &[MetadataValue]) -> Vec<MetadataValue> {
        let mut constraints = vec![MetadataValue::Identifier(identifier.to_string())];
        constraints.extend_from_slice(rest);
        constraints
    }

    /// Core retrieval algorithm (§4.7): sequential intersection across constraints,
    /// with optional fallback substitution on an empty step and either strict
    /// failure or best-effort retention of the last non-empty candidate set.
    fn retrieve_all(
        &self,
        constraints: &[MetadataValue],
        use_fallback: bool,
        best_effort: bool,
    ) -> Result<Vec<Arc<Template>>, LibraryError> {
        let inner = self.inner.lock().expect("library mutex poisoned");
        let mut iter = constraints.iter();
        let first = match iter.next() {
            Some(m) => m,
            None => return Ok(inner.templates.clone()),
        };
        let mut candidates = inner.carrying(first, use_fallback);
        if candidates.is_empty() && !best_effort {
            return Err(LibraryError::NotFound);
        }
        for m in iter {
            let step = inner.carrying(m, use_fallback);
            let next = intersect(&candidates, &step);
            if next.is_empty() {
                if best_effort {
                    return Ok(candidates);
                }
                return Err(LibraryError::NotFound);
            }
            candidates = next;
        }
        Ok(candidates)
    }

    fn retrieve_one(
        &self,
        constraints: &[MetadataValue],
        use_fallback: bool,
        best_effort: bool,
    ) -> Result<Arc<Template>, LibraryError> {
        self.retrieve_all(constraints, use_fallback, best_effort)?
            .into_iter()
            .next()
            .ok_or(LibraryError::NotFound)
    }

    // -- The 8 base (single|all) x (strict|fallback) x (exact|best-effort) forms --

    pub fn retrieve_single_strict_exact(&self, c: &[MetadataValue]) -> Result<Arc<Template>, LibraryError> {
        self.retrieve_one(c, false, false)
    }

    pub fn retrieve_single_strict_best_effort(&self, c: &[MetadataValue]) -> Result<Arc<Template>, LibraryError> {
        self.retrieve_one(c, false, true)
    }

    pub fn retrieve_single_fallback_exact(&self, c: &[MetadataValue]) -> Result<Arc<Template>, LibraryError> {
        self.retrieve_one(c, true, false)
    }

    pub fn retrieve_single_fallback_best_effort(&self, c: &[MetadataValue]) -> Result<Arc<Template>, LibraryError> {
        self.retrieve_one(c, true, true)
    }

    pub fn retrieve_all_strict_exact(&self, c: &[MetadataValue]) -> Result<Vec<Arc<Template>>, LibraryError> {
        self.retrieve_all(c, false, false)
    }

    pub fn retrieve_all_strict_best_effort(&self, c: &[MetadataValue]) -> Result<Vec<Arc<Template>>, LibraryError> {
        self.retrieve_all(c, false, true)
    }

    pub fn retrieve_all_fallback_exact(&self, c: &[MetadataValue]) -> Result<Vec<Arc<Template>>, LibraryError> {
        self.retrieve_all(c, true, false)
    }

    pub fn retrieve_all_fallback_best_effort(&self, c: &[MetadataValue]) -> Result<Vec<Arc<Template>>, LibraryError> {
        self.retrieve_all(c, true, true)
    }

    /// `TryRetrieve*` family (§6, §7): failure value (`None`) instead of an error.
    pub fn try_retrieve_single(&self, c: &[MetadataValue], use_fallback: bool) -> Option<Arc<Template>> {
        self.retrieve_one(c, use_fallback, false).ok()
    }

    // -- Identifier-first convenience overloads (§4.7) --

    pub fn retrieve_by_id(
        &self,
        identifier: &str,
        rest: &[MetadataValue],
        use_fallback: bool,
        best_effort: bool,
    ) -> Result<Arc<Template>, LibraryError> {
        let constraints = Self::constraints_with_identifier(identifier, rest);
        self.retrieve_one(&constraints, use_fallback, best_effort)
    }

    pub fn try_retrieve_by_id(
        &self,
        identifier: &str,
        rest: &[MetadataValue],
        use_fallback: bool,
    ) -> Option<Arc<Template>> {
        self.retrieve_by_id(identifier, rest, use_fallback, false).ok()
    }

    pub fn describe(&self) -> Vec<TemplateDescriptor> {
        let inner = self.inner.lock().expect("library mutex poisoned");
        inner
            .templates
            .iter()
            .map(|t| TemplateDescriptor {
                identifier: t.identifier().map(str::to_string),
                kind: t.body.kind_name(),
                languages: t
                    .metadata
                    .get_all(MetadataKind::Language)
                    .iter()
                    .map(|v| match v {
                        MetadataValue::Language(l) => l.to_string(),
                        _ => unreachable!(),
                    })
                    .collect(),
                models: t
                    .metadata
                    .get_all(MetadataKind::TargetModel)
                    .iter()
                    .map(|v| match v {
                        MetadataValue::TargetModel(m) => m.clone(),
                        _ => unreachable!(),
                    })
                    .collect(),
            })
            .collect()
    }
}

/// The process-wide shared library (§5, §9): lazily initialised, lives for the
/// process lifetime, consulted only as the `@render` fallback target.
static SHARED_LIBRARY: Lazy<Arc<TemplateLibrary>> = Lazy::new(|| Arc::new(TemplateLibrary::new()));

pub fn shared_library() -> Arc<TemplateLibrary> {
    SHARED_LIBRARY.clone()
}
