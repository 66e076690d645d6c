//! Parsed XML document interface.
//!
//! Raw XML parsing happens upstream; this module only models its output:
//! elements in document order, each with a path, its attributes and the
//! index of its parent element.
//!
//! # JSON forms
//!
//! ```text
//! [ { "path": "/a/b", "attributes": { "x": "1" }, "parent": 0 }, ... ]
//!
//! { "/a/b": { "attributes": { "x": "1" } },
//!   "/a/b/c": [ { "y": "2" }, { "y": "3" } ] }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contract::{ContactRole, ContactRoles, FilterRule};
use crate::error::{TransformError, TransformResult};

/// One XML element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub path: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Index of the enclosing element, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<usize>,
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Attribute value, `None` when missing or blank.
    pub fn non_empty(&self, name: &str) -> Option<&str> {
        self.attribute(name).filter(|v| !v.trim().is_empty())
    }
}

/// Elements of one source document in document order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedDocument {
    elements: Vec<Element>,
}

impl ParsedDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an element and return its index.
    pub fn push(&mut self, path: &str, attributes: &[(&str, &str)], parent: Option<usize>) -> usize {
        self.elements.push(Element {
            path: path.to_string(),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            parent,
        });
        self.elements.len() - 1
    }

    /// Append an element, taking the nearest earlier element whose path
    /// encloses this one as its parent.
    pub fn push_nested(&mut self, path: &str, attributes: &[(&str, &str)]) -> usize {
        let parent = self.enclosing(path);
        self.push(path, attributes, parent)
    }

    fn enclosing(&self, path: &str) -> Option<usize> {
        self.elements
            .iter()
            .rposition(|e| path.len() > e.path.len() && path.starts_with(&e.path) && path[e.path.len()..].starts_with('/'))
    }

    /// Load either JSON form.
    pub fn from_json(value: &Value) -> TransformResult<Self> {
        match value {
            Value::Array(items) => {
                let elements: Vec<Element> = items
                    .iter()
                    .map(|item| serde_json::from_value(item.clone()))
                    .collect::<Result<_, _>>()
                    .map_err(|e| TransformError::InvalidDocument(e.to_string()))?;
                if let Some((idx, _)) = elements
                    .iter()
                    .enumerate()
                    .find(|(idx, e)| e.parent.is_some_and(|p| p >= *idx))
                {
                    return Err(TransformError::InvalidDocument(format!(
                        "element {} references a parent that does not precede it",
                        idx
                    )));
                }
                Ok(Self { elements })
            }
            Value::Object(map) => {
                let mut doc = Self::new();
                for (path, entry) in map {
                    let entries = match entry {
                        Value::Array(items) => items.iter().collect::<Vec<_>>(),
                        other => vec![other],
                    };
                    for entry in entries {
                        let attributes = attributes_from_json(path, entry)?;
                        let parent = doc.enclosing(path);
                        doc.elements.push(Element {
                            path: path.clone(),
                            attributes,
                            parent,
                        });
                    }
                }
                Ok(doc)
            }
            _ => Err(TransformError::InvalidDocument(
                "document must be an array of elements or a path map".to_string(),
            )),
        }
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn element(&self, idx: usize) -> Option<&Element> {
        self.elements.get(idx)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// All elements at `path`, with their indices.
    pub fn all<'a, 'p>(&'a self, path: &'p str) -> impl Iterator<Item = (usize, &'a Element)> + 'p
    where
        'a: 'p,
    {
        self.elements.iter().enumerate().filter(move |(_, e)| e.path == path)
    }

    /// First element at `path`.
    pub fn first(&self, path: &str) -> Option<(usize, &Element)> {
        self.elements.iter().enumerate().find(|(_, e)| e.path == path)
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.first(path).is_some()
    }

    /// Whether `ancestor` is `idx` itself or one of its enclosing elements.
    pub fn is_within(&self, idx: usize, ancestor: usize) -> bool {
        let mut current = Some(idx);
        while let Some(i) = current {
            if i == ancestor {
                return true;
            }
            current = self.elements.get(i).and_then(|e| e.parent);
        }
        false
    }

    /// First element at `path` inside element `scope` (or `scope` itself).
    pub fn first_within(&self, path: &str, scope: usize) -> Option<(usize, &Element)> {
        self.elements
            .iter()
            .enumerate()
            .find(|(idx, e)| e.path == path && self.is_within(*idx, scope))
    }
}

fn attributes_from_json(path: &str, entry: &Value) -> TransformResult<BTreeMap<String, String>> {
    let object = match entry {
        Value::Object(obj) => match obj.get("attributes") {
            Some(Value::Object(attrs)) => attrs,
            _ => obj,
        },
        Value::Null => return Ok(BTreeMap::new()),
        _ => {
            return Err(TransformError::InvalidDocument(format!(
                "entry for '{}' is not an attribute object",
                path
            )))
        }
    };

    Ok(object
        .iter()
        .filter_map(|(name, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Null => return None,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => other.to_string(),
            };
            Some((name.clone(), text))
        })
        .collect())
}

// =============================================================================
// Contact selection
// =============================================================================

/// How repeated elements of the same kind are narrowed down.
///
/// - `LastValid`: among valid elements, a later element with the same
///   identity replaces an earlier one. Used for contact-scoped tables.
/// - `LastNonEmpty`: the last element carrying a non-empty value for
///   `attribute`, even if later elements exist without it. Used by
///   `last_valid_pr_contact` / `last_valid_sec_contact`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactSelectionPolicy {
    LastValid,
    LastNonEmpty { attribute: String },
}

impl ContactSelectionPolicy {
    /// Narrow `candidates` (already filtered for validity, in document order).
    ///
    /// `identity` names the attribute that identifies one logical entity for
    /// `LastValid`; without it every candidate is kept.
    pub fn select<'d>(
        &self,
        candidates: impl IntoIterator<Item = (usize, &'d Element)>,
        identity: Option<&str>,
    ) -> Vec<(usize, &'d Element)> {
        match self {
            ContactSelectionPolicy::LastValid => {
                let mut selected: Vec<(usize, &'d Element)> = Vec::new();
                for (idx, element) in candidates {
                    let key = identity.and_then(|attr| element.non_empty(attr));
                    let existing = key.and_then(|k| {
                        selected
                            .iter()
                            .position(|(_, e)| identity.and_then(|attr| e.non_empty(attr)) == Some(k))
                    });
                    match existing {
                        Some(pos) => selected[pos] = (idx, element),
                        None => selected.push((idx, element)),
                    }
                }
                selected
            }
            ContactSelectionPolicy::LastNonEmpty { attribute } => candidates
                .into_iter()
                .filter(|(_, e)| e.non_empty(attribute).is_some())
                .last()
                .into_iter()
                .collect(),
        }
    }
}

/// Resolves contact-fallback values for the chain resolver.
pub trait ContactSource {
    /// Value of `attribute` on the last contact with `role` that has one.
    fn last_non_empty(&self, role: ContactRole, attribute: &str) -> Option<String>;
}

/// [`ContactSource`] over a parsed document.
pub struct DocumentContacts<'a> {
    doc: &'a ParsedDocument,
    roles: &'a ContactRoles,
    rule: Option<&'a FilterRule>,
}

impl<'a> DocumentContacts<'a> {
    pub fn new(doc: &'a ParsedDocument, roles: &'a ContactRoles, rule: Option<&'a FilterRule>) -> Self {
        Self { doc, roles, rule }
    }
}

impl ContactSource for DocumentContacts<'_> {
    fn last_non_empty(&self, role: ContactRole, attribute: &str) -> Option<String> {
        let code = self.roles.code(role);
        let candidates = self
            .doc
            .all(&self.roles.contact_path)
            .filter(|(_, e)| e.attribute(&self.roles.role_attribute).map(str::trim) == Some(code))
            .filter(|(_, e)| self.rule.map_or(true, |r| r.accepts(&e.attributes)));

        let policy = ContactSelectionPolicy::LastNonEmpty {
            attribute: attribute.to_string(),
        };
        policy
            .select(candidates, None)
            .first()
            .and_then(|(_, e)| e.non_empty(attribute))
            .map(str::to_string)
    }
}
