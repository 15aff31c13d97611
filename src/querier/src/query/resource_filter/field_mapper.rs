use common::model::{FieldContext, TelemetryFieldKey};

use crate::query::error::QueryError;
use crate::query::{Column, ColumnType, FieldMapper};

pub const LABELS_COLUMN: Column = Column {
    name: "labels",
    column_type: ColumnType::JsonString,
};

pub const FINGERPRINT_COLUMN: Column = Column {
    name: "fingerprint",
    column_type: ColumnType::String,
};

pub const BUCKET_START_COLUMN: Column = Column {
    name: "seen_at_ts_bucket_start",
    column_type: ColumnType::UInt64,
};

/// Maps keys onto the resource tables. Resource keys live inside the
/// `labels` JSON column; the meta columns map to themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceFieldMapper;

impl ResourceFieldMapper {
    pub fn new() -> Self {
        Self
    }
}

impl FieldMapper for ResourceFieldMapper {
    fn column_for(&self, key: &TelemetryFieldKey) -> Result<Column, QueryError> {
        if key.field_context == FieldContext::Resource {
            return Ok(LABELS_COLUMN);
        }
        match key.name.as_str() {
            "labels" => Ok(LABELS_COLUMN),
            "fingerprint" => Ok(FINGERPRINT_COLUMN),
            "seen_at_ts_bucket_start" => Ok(BUCKET_START_COLUMN),
            _ => Err(QueryError::ColumnNotFound(key.clone())),
        }
    }

    fn field_for(&self, key: &TelemetryFieldKey) -> Result<String, QueryError> {
        let column = self.column_for(key)?;
        if key.field_context == FieldContext::Resource {
            return Ok(format!(
                "extract({},'{}')",
                column.name,
                key.name.replace('\\', "\\\\").replace('\'', "\\'")
            ));
        }
        Ok(column.name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_keys_read_labels() {
        let mapper = ResourceFieldMapper::new();
        let key = TelemetryFieldKey::resource("service.name");
        assert_eq!(mapper.column_for(&key).unwrap(), LABELS_COLUMN);
        assert_eq!(
            mapper.field_for(&key).unwrap(),
            "extract(labels,'service.name')"
        );
    }

    #[test]
    fn test_meta_columns() {
        let mapper = ResourceFieldMapper::new();
        assert_eq!(
            mapper.field_for(&TelemetryFieldKey::new("fingerprint")).unwrap(),
            "fingerprint"
        );
        assert_eq!(
            mapper
                .column_for(&TelemetryFieldKey::new("seen_at_ts_bucket_start"))
                .unwrap()
                .column_type,
            ColumnType::UInt64
        );
    }

    #[test]
    fn test_attribute_key_has_no_column() {
        let mapper = ResourceFieldMapper::new();
        let key = TelemetryFieldKey::attribute("http.method");
        assert_eq!(
            mapper.field_for(&key),
            Err(QueryError::ColumnNotFound(key.clone()))
        );
    }

    #[test]
    fn test_quote_in_key_name_is_escaped() {
        let mapper = ResourceFieldMapper::new();
        let key = TelemetryFieldKey::resource("it's");
        assert_eq!(mapper.field_for(&key).unwrap(), r"extract(labels,'it\'s')");
    }
}
