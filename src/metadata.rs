//! Template metadata and the type-indexed multiset that holds it (§3, §4.8).

use std::collections::HashMap;

/// Major world languages consulted by the language fallback scheme (§4.7) when no
/// exact match exists. Not locale-complete; just a fixed seed set, per the source
/// behaviour's "prefer a major language" rule.
const MAJOR_LANGUAGES: &[&str] = &["en", "es", "fr", "de", "zh", "ar", "ru", "pt", "ja", "hi"];

/// A case-insensitive BCP-47-like language tag (§3).
#[derive(Debug, Clone)]
pub struct LanguageCode(String);

impl LanguageCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `self` is a sub-language of `other` (`other` is a prefix, e.g. `en-US` of `en`).
    pub fn is_sub_language_of(&self, other: &LanguageCode) -> bool {
        self.0.to_ascii_lowercase().starts_with(&other.0.to_ascii_lowercase())
    }

    /// Trims the trailing `-REGION` subtag, if any.
    pub fn super_language(&self) -> LanguageCode {
        match self.0.rfind('-') {
            Some(idx) => LanguageCode(self.0[..idx].to_string()),
            None => self.clone(),
        }
    }

    /// Trims everything past the first `-`, yielding the primary subtag.
    pub fn topmost(&self) -> LanguageCode {
        match self.0.find('-') {
            Some(idx) => LanguageCode(self.0[..idx].to_string()),
            None => self.clone(),
        }
    }
}

impl PartialEq for LanguageCode {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}
impl Eq for LanguageCode {}

impl std::hash::Hash for LanguageCode {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state)
    }
}

impl std::fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The tag identifying a [`MetadataValue`]'s concrete kind, used as the
/// multiset's bucket key (§3: "type-indexed multiset").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKind {
    Identifier,
    Language,
    TargetModel,
    TargetModelFamily,
}

/// A single metadata attribute attached to a template (§3).
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Identifier(String),
    Language(LanguageCode),
    TargetModel(String),
    TargetModelFamily(String),
}

impl MetadataValue {
    pub fn kind(&self) -> MetadataKind {
        match self {
            MetadataValue::Identifier(_) => MetadataKind::Identifier,
            MetadataValue::Language(_) => MetadataKind::Language,
            MetadataValue::TargetModel(_) => MetadataKind::TargetModel,
            MetadataValue::TargetModelFamily(_) => MetadataKind::TargetModelFamily,
        }
    }
}

impl Eq for MetadataValue {}

impl std::hash::Hash for MetadataValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            MetadataValue::Identifier(s) => s.hash(state),
            MetadataValue::Language(l) => l.hash(state),
            MetadataValue::TargetModel(s) => s.hash(state),
            MetadataValue::TargetModelFamily(s) => s.hash(state),
        }
    }
}

/// A type-indexed multiset of metadata values (§3). The variant set is closed, so
/// the "lookup by supertype/interface" generality of the original is collapsed to
/// a single flat bucket per [`MetadataKind`], the tagged-sum analog the design
/// notes call for (§9: "dynamic typing -> tagged sum").
#[derive(Debug, Clone, Default)]
pub struct MetadataCollection {
    values: Vec<MetadataValue>,
    by_kind: HashMap<MetadataKind, Vec<MetadataValue>>,
}

impl MetadataCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: MetadataValue) {
        self.by_kind.entry(value.kind()).or_default().push(value.clone());
        self.values.push(value);
    }

    pub fn from_values(values: impl IntoIterator<Item = MetadataValue>) -> Self {
        let mut collection = Self::new();
        for v in values {
            collection.insert(v);
        }
        collection
    }

    pub fn try_get(&self, kind: MetadataKind) -> Option<&MetadataValue> {
        self.by_kind.get(&kind).and_then(|v| v.first())
    }

    pub fn get_all(&self, kind: MetadataKind) -> &[MetadataValue] {
        self.by_kind.get(&kind).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn has(&self, kind: MetadataKind) -> bool {
        self.by_kind.get(&kind).is_some_and(|v| !v.is_empty())
    }

    pub fn require(&self, kind: MetadataKind, msg: &str) -> Result<&MetadataValue, String> {
        self.try_get(kind).ok_or_else(|| msg.to_string())
    }

    pub fn contains_value(&self, value: &MetadataValue) -> bool {
        self.values.contains(value)
    }

    pub fn identifier(&self) -> Option<&str> {
        match self.try_get(MetadataKind::Identifier) {
            Some(MetadataValue::Identifier(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// The language fallback scheme (§4.7): exact match, else a major-world-language
/// member of the available set, else any available code. Never invents a code.
pub fn fallback_language<'a>(
    target: &LanguageCode,
    available: &'a [LanguageCode],
) -> Option<&'a LanguageCode> {
    if let Some(exact) = available.iter().find(|c| *c == target) {
        return Some(exact);
    }
    if let Some(major) = available
        .iter()
        .find(|c| MAJOR_LANGUAGES.iter().any(|m| c.as_str().eq_ignore_ascii_case(m)))
    {
        return Some(major);
    }
    available.first()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_code_equality_is_case_insensitive() {
        assert_eq!(LanguageCode::new("EN-us"), LanguageCode::new("en-US"));
    }

    #[test]
    fn super_and_topmost() {
        let c = LanguageCode::new("en-US-x");
        assert_eq!(c.super_language().as_str(), "en-US");
        assert_eq!(c.topmost().as_str(), "en");
    }

    #[test]
    fn fallback_prefers_exact_then_major() {
        let available = vec![LanguageCode::new("en"), LanguageCode::new("zz")];
        let picked = fallback_language(&LanguageCode::new("fr"), &available).unwrap();
        assert_eq!(picked.as_str(), "en");

        let available = vec![LanguageCode::new("en")];
        let picked = fallback_language(&LanguageCode::new("en"), &available).unwrap();
        assert_eq!(picked.as_str(), "en");
    }

    #[test]
    fn collection_buckets_by_kind() {
        let mut c = MetadataCollection::new();
        c.insert(MetadataValue::Identifier("greeting".into()));
        c.insert(MetadataValue::Language(LanguageCode::new("en")));
        assert!(c.has(MetadataKind::Identifier));
        assert_eq!(c.identifier(), Some("greeting"));
        assert!(!c.has(MetadataKind::TargetModel));
    }
}
