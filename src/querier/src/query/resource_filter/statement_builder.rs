use std::collections::HashMap;
use std::sync::Arc;

use common::config::QueryConfig;
use common::model::{QueryBuilderQuery, RequestType, Signal, Value, VariableItem};
use log::debug;

use super::condition_builder::ResourceConditionBuilder;
use super::field_mapper::{BUCKET_START_COLUMN, FINGERPRINT_COLUMN, ResourceFieldMapper};
use crate::query::error::QueryError;
use crate::query::filter::parse_filter;
use crate::query::keys::{MetadataStore, selectors_for};
use crate::query::statement::{SelectBuilder, Statement};
use crate::query::where_clause::{FilterCompilerOptions, prepare_where_clause};

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Resource table holding the fingerprints of a signal's series.
pub fn resource_table(signal: Signal) -> Result<&'static str, QueryError> {
    match signal {
        Signal::Traces => Ok("signoz_traces.distributed_traces_v3_resource"),
        Signal::Logs => Ok("signoz_logs.distributed_logs_v2_resource"),
        other => Err(QueryError::UnsupportedSignal(other)),
    }
}

/// Builds `SELECT fingerprint FROM <resource table> WHERE ...` statements
/// narrowing a query to the resources its filter can match.
///
/// Only resource keys contribute conditions. Full text and function calls
/// are ignored since the resource tables carry neither.
pub struct ResourceFilterStatementBuilder {
    signal: Signal,
    metadata: Arc<dyn MetadataStore>,
    field_mapper: ResourceFieldMapper,
    condition_builder: ResourceConditionBuilder,
    config: QueryConfig,
}

impl ResourceFilterStatementBuilder {
    pub fn new(signal: Signal, metadata: Arc<dyn MetadataStore>) -> Self {
        let field_mapper = ResourceFieldMapper::new();
        Self {
            signal,
            metadata,
            field_mapper,
            condition_builder: ResourceConditionBuilder::new(field_mapper),
            config: QueryConfig::default(),
        }
    }

    pub fn with_config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the fingerprint statement for `query` over `[start_ns, end_ns]`.
    ///
    /// The lower bucket bound reaches `bucket_lookback` seconds before the
    /// window so series first seen shortly before it are included. An
    /// `end_ns` of zero leaves the window open ended.
    pub fn build<A>(
        &self,
        start_ns: u64,
        end_ns: u64,
        request_type: RequestType,
        query: &QueryBuilderQuery<A>,
        variables: &HashMap<String, VariableItem>,
    ) -> Result<Statement, QueryError> {
        let signal = match query.signal {
            Signal::Unspecified => self.signal,
            signal => signal,
        };
        let table = resource_table(signal)?;

        let mut select = SelectBuilder::new()
            .select(FINGERPRINT_COLUMN.name)
            .from(table);

        let mut warnings = Vec::new();
        if let Some(expression) = query.filter_expression()
            && !expression.trim().is_empty()
        {
            let parsed = parse_filter(expression)?;
            let field_keys = self
                .metadata
                .get_keys_multi(&selectors_for(&parsed.keys(), signal));

            let mut opts =
                FilterCompilerOptions::new(&self.field_mapper, &self.condition_builder, &field_keys)
                    .with_variables(variables);
            opts.skip_full_text_filter = true;
            opts.skip_function_calls = true;
            opts.ignore_not_found_keys = self.config.ignore_not_found_keys;

            if let Some(clause) = prepare_where_clause(expression, &opts)? {
                select = select.where_expr(clause.condition, clause.args);
                warnings = clause.warnings;
            }
        }

        let start_bucket = (start_ns / NANOS_PER_SECOND).saturating_sub(self.config.bucket_lookback);
        select = select.where_expr(
            format!("{} >= ?", BUCKET_START_COLUMN.name),
            vec![Value::Int64(start_bucket as i64)],
        );
        if end_ns != 0 {
            let end_bucket = end_ns / NANOS_PER_SECOND;
            select = select.where_expr(
                format!("{} <= ?", BUCKET_START_COLUMN.name),
                vec![Value::Int64(end_bucket as i64)],
            );
        }

        let mut statement = select.build();
        statement.warnings = warnings;
        debug!(
            "Built {:?} resource filter for query '{}' on {}",
            request_type, query.name, table
        );
        Ok(statement)
    }
}
