//! 内存时态仓储
//!
//! 日志保存在进程内，区间计算使用 `interval::algebra`，用于测试和演示。

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::Result;
use crate::interval::{EntityInterval, IntervalPage, PlanLeaf, TimelinePoint, algebra};
use crate::models::attribute::{
    AttributeInstance, AttributeValue, OperationMode, SubAttributeInstance,
};
use crate::models::entity_record::EntityRecord;
use crate::query::evaluate::evaluate;
use crate::query::time::{LOW_WATER_MARK, TimeProperty, TimeQuery};
use crate::services::created_at::resolve_in;
use crate::storage::repository::{
    EntityFilter, InstanceQuery, IntervalQuery, SortOrder, TemporalRepository,
};

#[derive(Debug, Default)]
struct TemporalLog {
    instances: Vec<AttributeInstance>,
    sub_instances: Vec<SubAttributeInstance>,
    records: Vec<EntityRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryRepository {
    log: RwLock<TemporalLog>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_record(&self, record: EntityRecord) {
        self.log.write().records.push(record);
    }

    pub fn insert_instance(&self, instance: AttributeInstance) {
        self.log.write().instances.push(instance);
    }

    pub fn insert_sub_instance(&self, sub_instance: SubAttributeInstance) {
        self.log.write().sub_instances.push(sub_instance);
    }

    pub fn instance_count(&self) -> usize {
        self.log.read().instances.len()
    }
}

impl TemporalLog {
    /// 最新记录不是 Delete 且满足过滤条件的实体
    fn candidates(&self, filter: &EntityFilter) -> Result<BTreeSet<String>> {
        let pattern = filter.compiled_pattern()?;
        let mut latest: BTreeMap<&str, &EntityRecord> = BTreeMap::new();
        for record in &self.records {
            match latest.get(record.entity_id.as_str()) {
                Some(current) if current.ts > record.ts => {}
                _ => {
                    latest.insert(record.entity_id.as_str(), record);
                }
            }
        }
        Ok(latest
            .into_values()
            .filter(|r| r.operation_mode != OperationMode::Delete)
            .filter(|r| filter.accepts(&r.entity_id, &r.entity_type, pattern.as_ref()))
            .map(|r| r.entity_id.clone())
            .collect())
    }

    /// 每个 (实体, 属性) 的 Create 时间，升序
    fn create_index(&self, attribute_id: &str) -> HashMap<&str, Vec<DateTime<Utc>>> {
        let mut index: HashMap<&str, Vec<DateTime<Utc>>> = HashMap::new();
        for instance in &self.instances {
            if instance.attribute_id == attribute_id
                && instance.operation_mode == OperationMode::Create
            {
                index
                    .entry(instance.entity_id.as_str())
                    .or_default()
                    .push(instance.ts);
            }
        }
        for creates in index.values_mut() {
            creates.sort();
        }
        index
    }

    fn leaf_intervals(
        &self,
        leaf: PlanLeaf<'_>,
        candidates: &BTreeSet<String>,
        time: &TimeQuery,
    ) -> Vec<EntityInterval> {
        let creates = match leaf {
            PlanLeaf::Comparison(_) => self.create_index(leaf.attribute()),
            PlanLeaf::Geo(_) => HashMap::new(),
        };
        let points = self
            .instances
            .iter()
            .filter(|i| i.attribute_id == leaf.attribute() && candidates.contains(&i.entity_id))
            .filter_map(|instance| {
                let t = instance.time_of(time.property())?;
                let result = match leaf {
                    PlanLeaf::Comparison(term) => {
                        let subs: Vec<SubAttributeInstance> = if term.sub_attribute.is_some() {
                            self.sub_instances
                                .iter()
                                .filter(|s| s.parent_instance_id == instance.instance_id)
                                .cloned()
                                .collect()
                        } else {
                            Vec::new()
                        };
                        let created_at = creates
                            .get(instance.entity_id.as_str())
                            .map(|c| resolve_in(c, instance.ts))
                            .filter(|t| *t != LOW_WATER_MARK);
                        evaluate(term, instance, &subs, created_at)
                    }
                    PlanLeaf::Geo(geo) => match &instance.value {
                        Some(AttributeValue::Geometry(stored))
                            if instance.operation_mode != OperationMode::Delete =>
                        {
                            geo.matches(stored)
                        }
                        _ => false,
                    },
                };
                Some(TimelinePoint::new(instance.entity_id.clone(), t, result))
            })
            .collect();
        algebra::timeline_intervals(points, time)
    }
}

#[async_trait]
impl TemporalRepository for MemoryRepository {
    async fn find_intervals(&self, query: &IntervalQuery) -> Result<IntervalPage> {
        let log = self.log.read();
        let candidates = log.candidates(&query.filter)?;
        let intervals = match &query.plan {
            Some(plan) => {
                plan.evaluate(&mut |leaf| Ok(log.leaf_intervals(leaf, &candidates, &query.time)))?
            }
            None => {
                let window = query.time.window();
                candidates
                    .iter()
                    .map(|id| EntityInterval::new(id.clone(), window.start, window.end))
                    .collect()
            }
        };
        let intervals = algebra::normalize(intervals);

        let page = match &query.page {
            Some(page) => {
                let mut result =
                    algebra::paginate(intervals, page.anchor.as_deref(), page.size as usize);
                if !page.count {
                    result.total_entities = None;
                }
                result
            }
            None => IntervalPage {
                intervals,
                ..Default::default()
            },
        };
        tracing::debug!(
            candidates = candidates.len(),
            intervals = page.intervals.len(),
            "memory interval page"
        );
        Ok(page)
    }

    async fn entity_records(&self, entity_id: &str) -> Result<Vec<EntityRecord>> {
        let mut records: Vec<EntityRecord> = self
            .log
            .read()
            .records
            .iter()
            .filter(|r| r.entity_id == entity_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.ts);
        Ok(records)
    }

    async fn attribute_instances(&self, query: &InstanceQuery) -> Result<Vec<AttributeInstance>> {
        let log = self.log.read();
        let property = query.time.property();
        let mut by_attribute: BTreeMap<&str, Vec<(DateTime<Utc>, &AttributeInstance)>> =
            BTreeMap::new();
        for instance in &log.instances {
            if instance.entity_id != query.interval.entity_id {
                continue;
            }
            if !query.attributes.is_empty() && !query.attributes.contains(&instance.attribute_id)
            {
                continue;
            }
            let Some(t) = instance.time_of(property) else {
                continue;
            };
            if query.interval.contains(t) && query.time.accepts(t) {
                by_attribute
                    .entry(instance.attribute_id.as_str())
                    .or_default()
                    .push((t, instance));
            }
        }

        let mut result = Vec::new();
        for (_, mut rows) in by_attribute {
            rows.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.instance_id.cmp(&b.1.instance_id)));
            if query.order == SortOrder::Descending {
                rows.reverse();
            }
            result.extend(
                rows.into_iter()
                    .take(query.limit as usize)
                    .map(|(_, instance)| instance.clone()),
            );
        }
        Ok(result)
    }

    async fn sub_attribute_instances(
        &self,
        parent_instance_ids: &[String],
    ) -> Result<Vec<SubAttributeInstance>> {
        let parents: HashSet<&str> = parent_instance_ids.iter().map(String::as_str).collect();
        let mut subs: Vec<SubAttributeInstance> = self
            .log
            .read()
            .sub_instances
            .iter()
            .filter(|s| parents.contains(s.parent_instance_id.as_str()))
            .cloned()
            .collect();
        subs.sort_by_key(|s| s.ts);
        Ok(subs)
    }

    async fn create_timestamps(
        &self,
        entity_id: &str,
        attribute_id: &str,
    ) -> Result<Vec<DateTime<Utc>>> {
        let mut timestamps: Vec<DateTime<Utc>> = self
            .log
            .read()
            .instances
            .iter()
            .filter(|i| i.entity_id == entity_id && i.attribute_id == attribute_id)
            .filter_map(|i| i.time_of(TimeProperty::CreatedAt))
            .collect();
        timestamps.sort();
        Ok(timestamps)
    }

    async fn max_attribute_count(&self, entity_ids: &[String]) -> Result<usize> {
        let log = self.log.read();
        let mut per_entity: BTreeMap<&str, HashSet<&str>> = BTreeMap::new();
        for instance in &log.instances {
            if entity_ids.contains(&instance.entity_id) {
                per_entity
                    .entry(instance.entity_id.as_str())
                    .or_default()
                    .insert(instance.attribute_id.as_str());
            }
        }
        Ok(per_entity.values().map(HashSet::len).max().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextDocument, ResolvedContext};
    use crate::interval::IntervalPlan;
    use crate::query::parser::QueryParser;
    use crate::storage::repository::PageRequest;
    use chrono::{Duration, TimeZone};

    const TEMPERATURE: &str = "https://example.org/temperature";

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn record(entity: &str, mode: OperationMode, minute: i64) -> EntityRecord {
        EntityRecord {
            entity_id: entity.into(),
            entity_type: "https://example.org/Sensor".into(),
            operation_mode: mode,
            ts: at(minute),
        }
    }

    fn reading(entity: &str, id: &str, minute: i64, value: f64, mode: OperationMode) -> AttributeInstance {
        AttributeInstance {
            instance_id: id.into(),
            entity_id: entity.into(),
            attribute_id: TEMPERATURE.into(),
            operation_mode: mode,
            value: (mode != OperationMode::Delete).then_some(AttributeValue::Number(value)),
            observed_at: Some(at(minute)),
            ts: at(minute),
            dataset_id: None,
            unit_code: None,
            has_sub_attributes: false,
        }
    }

    fn repository() -> MemoryRepository {
        let repo = MemoryRepository::new();
        for entity in ["urn:a", "urn:b", "urn:c"] {
            repo.insert_record(record(entity, OperationMode::Create, 0));
        }
        repo.insert_record(record("urn:c", OperationMode::Delete, 30));
        let values = [(0, 10.0), (1, 25.0), (2, 26.0), (3, 5.0), (4, 30.0)];
        for (minute, value) in values {
            let mode = if minute == 0 {
                OperationMode::Create
            } else {
                OperationMode::Update
            };
            repo.insert_instance(reading("urn:a", &format!("a{minute}"), minute, value, mode));
            repo.insert_instance(reading("urn:b", &format!("b{minute}"), minute, value + 100.0, mode));
        }
        repo.insert_instance(reading("urn:c", "c0", 0, 50.0, OperationMode::Create));
        repo
    }

    fn between(start: i64, end: i64) -> TimeQuery {
        TimeQuery::from_parts(
            Some(crate::query::time::TimeRelation::Between),
            Some(at(start)),
            Some(at(end)),
            TimeProperty::ObservedAt,
            true,
        )
        .unwrap()
    }

    fn plan(query: &str) -> IntervalPlan {
        let context = ResolvedContext::default();
        let term = QueryParser::new(&context).parse(query).unwrap();
        IntervalPlan::build(Some(&term), None).unwrap()
    }

    #[tokio::test]
    async fn test_deleted_entities_are_not_candidates() {
        let repo = repository();
        let page = repo
            .find_intervals(&IntervalQuery {
                filter: EntityFilter::default(),
                time: between(0, 10),
                plan: None,
                page: None,
            })
            .await
            .unwrap();
        assert_eq!(page.entity_ids(), vec!["urn:a", "urn:b"]);
        assert_eq!(page.intervals[0].start, at(0));
    }

    #[tokio::test]
    async fn test_comparison_intervals() {
        let repo = repository();
        let page = repo
            .find_intervals(&IntervalQuery {
                filter: EntityFilter::default(),
                time: between(0, 10),
                plan: Some(plan("https://example.org/temperature>20")),
                page: None,
            })
            .await
            .unwrap();
        assert_eq!(
            page.intervals,
            vec![
                EntityInterval::new("urn:a", at(1), at(2)),
                EntityInterval::new("urn:a", at(4), at(4)),
                EntityInterval::new("urn:b", at(0), at(4)),
            ]
        );
    }

    #[tokio::test]
    async fn test_pagination_and_count() {
        let repo = repository();
        let page = repo
            .find_intervals(&IntervalQuery {
                filter: EntityFilter::default(),
                time: between(0, 10),
                plan: None,
                page: Some(PageRequest {
                    anchor: None,
                    size: 1,
                    count: true,
                }),
            })
            .await
            .unwrap();
        assert_eq!(page.entity_ids(), vec!["urn:a"]);
        assert_eq!(page.next_anchor.as_deref(), Some("urn:b"));
        assert_eq!(page.prev_anchor, None);
        assert_eq!(page.total_entities, Some(2));
    }

    #[tokio::test]
    async fn test_last_n_takes_latest_per_attribute() {
        let repo = repository();
        let instances = repo
            .attribute_instances(&InstanceQuery {
                interval: EntityInterval::new("urn:a", at(0), at(10)),
                time: between(0, 10),
                attributes: vec![],
                limit: 2,
                order: SortOrder::Descending,
            })
            .await
            .unwrap();
        let ids: Vec<&str> = instances.iter().map(|i| i.instance_id.as_str()).collect();
        assert_eq!(ids, vec!["a4", "a3"]);
    }

    #[tokio::test]
    async fn test_create_timestamps_and_attribute_count() {
        let repo = repository();
        assert_eq!(
            repo.create_timestamps("urn:a", TEMPERATURE).await.unwrap(),
            vec![at(0)]
        );
        assert_eq!(
            repo.max_attribute_count(&["urn:a".into(), "urn:b".into()])
                .await
                .unwrap(),
            1
        );
        assert_eq!(repo.max_attribute_count(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_created_at_follows_latest_create() {
        let repo = MemoryRepository::new();
        repo.insert_record(record("urn:x", OperationMode::Create, 0));
        for (minute, mode) in [
            (0, OperationMode::Create),
            (1, OperationMode::Update),
            (3, OperationMode::Create),
            (4, OperationMode::Update),
        ] {
            repo.insert_instance(reading("urn:x", &format!("x{minute}"), minute, 1.0, mode));
        }

        let raw = serde_json::json!({"@context": {"@vocab": "https://example.org/"}});
        let document = ContextDocument::parse("https://example.org/ctx", &raw).unwrap();
        let context = ResolvedContext::from_documents(&[std::sync::Arc::new(document)]);
        let term = QueryParser::new(&context)
            .parse("temperature.createdAt>=2024-01-01T00:02:00Z")
            .unwrap();
        let page = repo
            .find_intervals(&IntervalQuery {
                filter: EntityFilter::default(),
                time: between(0, 10),
                plan: IntervalPlan::build(Some(&term), None),
                page: None,
            })
            .await
            .unwrap();
        assert_eq!(
            page.intervals,
            vec![EntityInterval::new("urn:x", at(3), at(4))]
        );
    }
}
