use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a field lives on a telemetry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldContext {
    Resource,
    Attribute,
    Span,
    Log,
    Scope,
    Body,
    Metric,
    #[default]
    #[serde(rename = "")]
    Unspecified,
}

impl FieldContext {
    /// Parse a key-text prefix such as `resource` or `attribute`.
    pub fn from_prefix(s: &str) -> Option<Self> {
        match s {
            "resource" => Some(FieldContext::Resource),
            "attribute" => Some(FieldContext::Attribute),
            "span" => Some(FieldContext::Span),
            "log" => Some(FieldContext::Log),
            "scope" => Some(FieldContext::Scope),
            "body" => Some(FieldContext::Body),
            "metric" => Some(FieldContext::Metric),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldContext::Resource => "resource",
            FieldContext::Attribute => "attribute",
            FieldContext::Span => "span",
            FieldContext::Log => "log",
            FieldContext::Scope => "scope",
            FieldContext::Body => "body",
            FieldContext::Metric => "metric",
            FieldContext::Unspecified => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FieldDataType {
    #[serde(rename = "string")]
    String,
    #[serde(rename = "int64")]
    Int64,
    #[serde(rename = "float64")]
    Float64,
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "[]string")]
    ArrayString,
    #[serde(rename = "[]int64")]
    ArrayInt64,
    #[serde(rename = "[]float64")]
    ArrayFloat64,
    #[serde(rename = "[]bool")]
    ArrayBool,
    #[default]
    #[serde(rename = "")]
    Unspecified,
}

impl FieldDataType {
    /// Parse a key-text type suffix such as `string` or `[]int64`.
    pub fn from_suffix(s: &str) -> Option<Self> {
        match s {
            "string" | "str" => Some(FieldDataType::String),
            "int64" | "int" => Some(FieldDataType::Int64),
            "float64" | "float" | "number" => Some(FieldDataType::Float64),
            "bool" | "boolean" => Some(FieldDataType::Bool),
            "[]string" => Some(FieldDataType::ArrayString),
            "[]int64" => Some(FieldDataType::ArrayInt64),
            "[]float64" => Some(FieldDataType::ArrayFloat64),
            "[]bool" => Some(FieldDataType::ArrayBool),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldDataType::String => "string",
            FieldDataType::Int64 => "int64",
            FieldDataType::Float64 => "float64",
            FieldDataType::Bool => "bool",
            FieldDataType::ArrayString => "[]string",
            FieldDataType::ArrayInt64 => "[]int64",
            FieldDataType::ArrayFloat64 => "[]float64",
            FieldDataType::ArrayBool => "[]bool",
            FieldDataType::Unspecified => "",
        }
    }
}

/// The telemetry signal a query or key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Traces,
    Logs,
    Metrics,
    #[default]
    #[serde(rename = "")]
    Unspecified,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Traces => "traces",
            Signal::Logs => "logs",
            Signal::Metrics => "metrics",
            Signal::Unspecified => "",
        }
    }
}

/// A logical field reference. Identity is `(name, field_context)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetryFieldKey {
    pub name: String,
    pub field_context: FieldContext,
    pub field_data_type: FieldDataType,
    pub materialized: bool,
    pub signal: Signal,
}

impl PartialEq for TelemetryFieldKey {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.field_context == other.field_context
    }
}

impl Eq for TelemetryFieldKey {}

impl std::hash::Hash for TelemetryFieldKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.field_context.hash(state);
    }
}

impl TelemetryFieldKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn resource(name: impl Into<String>) -> Self {
        Self::new(name).with_context(FieldContext::Resource)
    }

    pub fn attribute(name: impl Into<String>) -> Self {
        Self::new(name).with_context(FieldContext::Attribute)
    }

    pub fn with_context(mut self, context: FieldContext) -> Self {
        self.field_context = context;
        self
    }

    pub fn with_data_type(mut self, data_type: FieldDataType) -> Self {
        self.field_data_type = data_type;
        self
    }

    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.signal = signal;
        self
    }

    /// Parse key text of the form `[context.]name[:type]`.
    ///
    /// A leading segment is only treated as a context when it is one of the
    /// known prefixes, so `service.name` stays a plain name while
    /// `resource.service.name` selects the resource context.
    pub fn from_key_text(text: &str) -> Self {
        let text = text.trim();
        let mut key = TelemetryFieldKey::default();

        let mut rest = text;
        if let Some((head, tail)) = rest.rsplit_once(':')
            && let Some(data_type) = FieldDataType::from_suffix(tail)
        {
            key.field_data_type = data_type;
            rest = head;
        }

        if let Some((prefix, name)) = rest.split_once('.')
            && let Some(context) = FieldContext::from_prefix(prefix)
        {
            key.field_context = context;
            rest = name;
        } else if let Some(context) = FieldContext::from_prefix(rest)
            && context == FieldContext::Body
        {
            key.field_context = context;
            rest = "";
        }

        key.name = rest.to_string();
        key
    }
}

impl fmt::Display for TelemetryFieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field_context != FieldContext::Unspecified {
            write!(f, "{}.", self.field_context.as_str())?;
        }
        write!(f, "{}", self.name)?;
        if self.field_data_type != FieldDataType::Unspecified {
            write!(f, ":{}", self.field_data_type.as_str())?;
        }
        Ok(())
    }
}
