//! PostgreSQL 时态仓储
//!
//! 区间计算整体下推到数据库，行映射在这里完成。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, QueryResult, Statement};

use crate::config::config::DatabaseConfig;
use crate::error::{AppError, Result};
use crate::interval::{EntityInterval, IntervalPage, algebra};
use crate::models::attribute::{AttributeInstance, AttributeValue, OperationMode, SubAttributeInstance};
use crate::models::entity_record::EntityRecord;
use crate::storage::compiler;
use crate::storage::repository::{InstanceQuery, IntervalQuery, TemporalRepository};

pub struct PostgresRepository {
    conn: DatabaseConnection,
}

impl PostgresRepository {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let mut options = ConnectOptions::new(config.url.clone());
        options
            .min_connections(config.min_connections)
            .max_connections(config.max_connections.max(1))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);
        let conn = Database::connect(options).await.map_err(|e| {
            tracing::error!(error = %e, "failed to connect to PostgreSQL");
            AppError::Database(e.to_string())
        })?;
        tracing::info!(
            max_connections = config.max_connections,
            "PostgreSQL connection pool ready"
        );
        Ok(Self { conn })
    }

    pub fn from_connection(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn ping(&self) -> Result<()> {
        self.conn.ping().await.map_err(AppError::from)
    }

    async fn query_all(&self, statement: Statement) -> Result<Vec<QueryResult>> {
        self.conn.query_all(statement).await.map_err(|e| {
            tracing::error!(error = %e, "temporal query failed");
            AppError::Database(e.to_string())
        })
    }

    async fn query_anchor(&self, statement: Option<Statement>) -> Result<Option<String>> {
        let Some(statement) = statement else {
            return Ok(None);
        };
        let rows = self.query_all(statement).await?;
        rows.first()
            .map(|row| get::<String>(row, "entity_id"))
            .transpose()
    }
}

#[async_trait]
impl TemporalRepository for PostgresRepository {
    async fn find_intervals(&self, query: &IntervalQuery) -> Result<IntervalPage> {
        let compiled = compiler::compile_interval_query(query);
        let rows = self.query_all(compiled.intervals).await?;
        let intervals = rows
            .iter()
            .map(|row| {
                Ok(EntityInterval::new(
                    get::<String>(row, "entity_id")?,
                    get::<DateTime<Utc>>(row, "start_time")?,
                    get::<DateTime<Utc>>(row, "end_time")?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        let intervals = maximal_intervals(query, intervals);

        let next_anchor = self.query_anchor(compiled.next_anchor).await?;
        let prev_anchor = self.query_anchor(compiled.prev_anchor).await?;
        let total_entities = match compiled.count {
            Some(statement) => {
                let rows = self.query_all(statement).await?;
                let total = rows
                    .first()
                    .map(|row| get::<i64>(row, "total"))
                    .transpose()?
                    .unwrap_or(0);
                Some(total.max(0) as u64)
            }
            None => None,
        };

        tracing::debug!(
            intervals = intervals.len(),
            ?next_anchor,
            ?prev_anchor,
            "interval page loaded"
        );
        Ok(IntervalPage {
            intervals,
            next_anchor,
            prev_anchor,
            total_entities,
        })
    }

    async fn entity_records(&self, entity_id: &str) -> Result<Vec<EntityRecord>> {
        let rows = self
            .query_all(compiler::entity_records_statement(entity_id))
            .await?;
        rows.iter()
            .map(|row| {
                Ok(EntityRecord {
                    entity_id: get(row, "entity_id")?,
                    entity_type: get(row, "entity_type")?,
                    operation_mode: get::<String>(row, "operation_mode")?.parse()?,
                    ts: get(row, "ts")?,
                })
            })
            .collect()
    }

    async fn attribute_instances(&self, query: &InstanceQuery) -> Result<Vec<AttributeInstance>> {
        let rows = self.query_all(compiler::instances_statement(query)).await?;
        rows.iter().map(map_instance).collect()
    }

    async fn sub_attribute_instances(
        &self,
        parent_instance_ids: &[String],
    ) -> Result<Vec<SubAttributeInstance>> {
        if parent_instance_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .query_all(compiler::sub_instances_statement(parent_instance_ids))
            .await?;
        rows.iter().map(map_sub_instance).collect()
    }

    async fn create_timestamps(
        &self,
        entity_id: &str,
        attribute_id: &str,
    ) -> Result<Vec<DateTime<Utc>>> {
        let rows = self
            .query_all(compiler::create_timestamps_statement(entity_id, attribute_id))
            .await?;
        rows.iter().map(|row| get(row, "ts")).collect()
    }

    async fn max_attribute_count(&self, entity_ids: &[String]) -> Result<usize> {
        if entity_ids.is_empty() {
            return Ok(0);
        }
        let rows = self
            .query_all(compiler::max_attribute_count_statement(entity_ids))
            .await?;
        let count = rows
            .first()
            .map(|row| get::<i64>(row, "attributes"))
            .transpose()?
            .unwrap_or(0);
        Ok(count.max(0) as usize)
    }
}

/// 嵌套 OR 只做两两合并，带计划的结果统一合并为最大不相交区间
fn maximal_intervals(query: &IntervalQuery, intervals: Vec<EntityInterval>) -> Vec<EntityInterval> {
    if query.plan.is_some() {
        algebra::normalize(intervals)
    } else {
        intervals
    }
}

fn get<T: sea_orm::TryGetable>(row: &QueryResult, column: &str) -> Result<T> {
    row.try_get::<T>("", column).map_err(|e| {
        AppError::PersistenceRetrievalFailure(format!("column '{column}': {e}"))
    })
}

fn map_instance(row: &QueryResult) -> Result<AttributeInstance> {
    let operation_mode: OperationMode = get::<String>(row, "operation_mode")?.parse()?;
    let value = if operation_mode == OperationMode::Delete {
        None
    } else {
        map_value(row)?
    };
    Ok(AttributeInstance {
        instance_id: get(row, "instance_id")?,
        entity_id: get(row, "entity_id")?,
        attribute_id: get(row, "attribute_id")?,
        operation_mode,
        value,
        observed_at: get(row, "observed_at")?,
        ts: get(row, "ts")?,
        dataset_id: get(row, "dataset_id")?,
        unit_code: get(row, "unit_code")?,
        has_sub_attributes: get::<Option<bool>>(row, "has_sub_attributes")?.unwrap_or(false),
    })
}

fn map_sub_instance(row: &QueryResult) -> Result<SubAttributeInstance> {
    Ok(SubAttributeInstance {
        instance_id: get(row, "instance_id")?,
        parent_instance_id: get(row, "parent_instance_id")?,
        attribute_id: get(row, "attribute_id")?,
        value: map_value(row)?,
        observed_at: get(row, "observed_at")?,
        ts: get(row, "ts")?,
        dataset_id: get(row, "dataset_id")?,
        unit_code: get(row, "unit_code")?,
    })
}

/// 取有值的那一个值列
fn map_value(row: &QueryResult) -> Result<Option<AttributeValue>> {
    if let Some(text) = get::<Option<String>>(row, "value_text")? {
        return Ok(Some(AttributeValue::String(text)));
    }
    if let Some(number) = get::<Option<f64>>(row, "value_number")? {
        return Ok(Some(AttributeValue::Number(number)));
    }
    if let Some(flag) = get::<Option<bool>>(row, "value_boolean")? {
        return Ok(Some(AttributeValue::Boolean(flag)));
    }
    if let Some(datetime) = get::<Option<DateTime<Utc>>>(row, "value_datetime")? {
        return Ok(Some(AttributeValue::DateTime(datetime)));
    }
    if let Some(compound) = get::<Option<serde_json::Value>>(row, "value_compound")? {
        return Ok(Some(AttributeValue::Compound(compound)));
    }
    if let Some(target) = get::<Option<String>>(row, "value_relationship")? {
        return Ok(Some(AttributeValue::Relationship(target)));
    }
    if let Some(geometry) = get::<Option<String>>(row, "geo_json")? {
        let geometry: geojson::Geometry = serde_json::from_str(&geometry)?;
        return Ok(Some(AttributeValue::Geometry(geometry)));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ResolvedContext;
    use crate::interval::IntervalPlan;
    use crate::query::parser::QueryParser;
    use crate::query::time::{TimeProperty, TimeQuery};
    use chrono::{Duration, TimeZone};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn query(q: Option<&str>) -> IntervalQuery {
        let context = ResolvedContext::default();
        let plan = q.and_then(|q| {
            let term = QueryParser::new(&context).parse(q).unwrap();
            IntervalPlan::build(Some(&term), None)
        });
        IntervalQuery {
            filter: Default::default(),
            time: TimeQuery::unbounded(TimeProperty::ObservedAt),
            plan,
            page: None,
        }
    }

    #[test]
    fn test_nested_or_rows_are_merged() {
        let query = query(Some(
            "(https://example.org/a>1|https://example.org/b>1);https://example.org/c>1",
        ));
        assert!(matches!(query.plan, Some(IntervalPlan::And(_))));
        let rows = vec![
            EntityInterval::new("urn:a", at(0), at(6)),
            EntityInterval::new("urn:a", at(2), at(8)),
            EntityInterval::new("urn:b", at(1), at(2)),
        ];
        assert_eq!(
            maximal_intervals(&query, rows),
            vec![
                EntityInterval::new("urn:a", at(0), at(8)),
                EntityInterval::new("urn:b", at(1), at(2)),
            ]
        );
    }

    #[test]
    fn test_unfiltered_rows_pass_through() {
        let rows = vec![EntityInterval::new("urn:a", at(0), at(6))];
        assert_eq!(maximal_intervals(&query(None), rows.clone()), rows);
    }
}
