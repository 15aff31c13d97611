//! Field key lookup.
//!
//! Filters reference fields by name; the metadata store knows which concrete
//! keys (context and data type) exist for each name.

use std::collections::{HashMap, HashSet};

use common::model::{FieldContext, FieldDataType, Signal, TelemetryFieldKey};

/// One name lookup against the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldKeySelector {
    pub name: String,
    pub signal: Signal,
    pub field_context: FieldContext,
    pub field_data_type: FieldDataType,
}

impl FieldKeySelector {
    pub fn new(name: impl Into<String>, signal: Signal) -> Self {
        Self {
            name: name.into(),
            signal,
            field_context: FieldContext::Unspecified,
            field_data_type: FieldDataType::Unspecified,
        }
    }
}

/// Resolves field names to the keys known for them.
pub trait MetadataStore: Send + Sync {
    /// Keys per selector name. Unknown names map to nothing.
    fn get_keys_multi(
        &self,
        selectors: &[FieldKeySelector],
    ) -> HashMap<String, Vec<TelemetryFieldKey>>;
}

/// Metadata store over a fixed key list.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMetadataStore {
    keys: HashMap<String, Vec<TelemetryFieldKey>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: TelemetryFieldKey) -> Self {
        self.insert(key);
        self
    }

    pub fn insert(&mut self, key: TelemetryFieldKey) {
        let entry = self.keys.entry(key.name.clone()).or_default();
        if !entry.contains(&key) {
            entry.push(key);
        }
    }

    pub fn len(&self) -> usize {
        self.keys.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<TelemetryFieldKey> for InMemoryMetadataStore {
    fn from_iter<T: IntoIterator<Item = TelemetryFieldKey>>(iter: T) -> Self {
        let mut store = Self::new();
        for key in iter {
            store.insert(key);
        }
        store
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn get_keys_multi(
        &self,
        selectors: &[FieldKeySelector],
    ) -> HashMap<String, Vec<TelemetryFieldKey>> {
        let mut found = HashMap::new();
        for selector in selectors {
            let Some(keys) = self.keys.get(&selector.name) else {
                continue;
            };
            let matching: Vec<TelemetryFieldKey> = keys
                .iter()
                .filter(|key| {
                    selector.signal == Signal::Unspecified
                        || key.signal == Signal::Unspecified
                        || key.signal == selector.signal
                })
                .cloned()
                .collect();
            if !matching.is_empty() {
                found.insert(selector.name.clone(), matching);
            }
        }
        found
    }
}

/// Selectors needed to resolve every key text in `key_texts`.
///
/// Besides the parsed name, the literal `context.name` text is looked up so
/// a name whose first segment happens to be a context prefix still resolves.
pub fn selectors_for(key_texts: &[&str], signal: Signal) -> Vec<FieldKeySelector> {
    let mut seen = HashSet::new();
    let mut selectors = Vec::new();
    for text in key_texts {
        let key = TelemetryFieldKey::from_key_text(text);
        let mut names = vec![key.name.clone()];
        if key.field_context != FieldContext::Unspecified {
            names.push(format!("{}.{}", key.field_context.as_str(), key.name));
        }
        for name in names {
            if seen.insert(name.clone()) {
                selectors.push(FieldKeySelector::new(name, signal));
            }
        }
    }
    selectors
}

/// Outcome of resolving one key text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedKeys {
    pub keys: Vec<TelemetryFieldKey>,
    pub warning: Option<String>,
}

/// Narrow the keys known for a key text by its explicit context and type.
///
/// When a name is known as both a resource and an attribute key and the
/// text does not say which, resource keys win and a warning is produced.
pub fn resolve_key_text(
    text: &str,
    field_keys: &HashMap<String, Vec<TelemetryFieldKey>>,
) -> ResolvedKeys {
    let wanted = TelemetryFieldKey::from_key_text(text);

    let mut keys: Vec<TelemetryFieldKey> = field_keys
        .get(&wanted.name)
        .map(|keys| {
            keys.iter()
                .filter(|key| {
                    wanted.field_context == FieldContext::Unspecified
                        || key.field_context == wanted.field_context
                })
                .filter(|key| {
                    wanted.field_data_type == FieldDataType::Unspecified
                        || key.field_data_type == wanted.field_data_type
                })
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    if keys.is_empty() && wanted.field_context != FieldContext::Unspecified {
        let literal = format!("{}.{}", wanted.field_context.as_str(), wanted.name);
        if let Some(found) = field_keys.get(&literal) {
            keys = found.clone();
        }
    }

    let mut warning = None;
    if keys.len() > 1 {
        let mut message = format!(
            "Key `{}` is ambiguous, found {} different combinations of field context / data type: {}.",
            wanted.name,
            keys.len(),
            keys.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        let has_resource = keys
            .iter()
            .any(|k| k.field_context == FieldContext::Resource);
        let has_attribute = keys
            .iter()
            .any(|k| k.field_context == FieldContext::Attribute);
        if has_resource && has_attribute {
            keys.retain(|k| k.field_context == FieldContext::Resource);
            message.push_str(&format!(
                " Using `resource` context by default. To query attributes explicitly, use the fully qualified name (e.g., 'attribute.{}')",
                wanted.name
            ));
        }
        warning = Some(message);
    }

    ResolvedKeys { keys, warning }
}
