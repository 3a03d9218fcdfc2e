//! 实体时态重建
//!
//! 对每个区间取属性实例，解析 createdAt，挂上子属性，再把同一实体的多个区间合并为一个实体。

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::Result;
use crate::interval::{EntityInterval, ResultGovernor};
use crate::models::attribute::{AttributeInstance, SubAttributeInstance};
use crate::models::entity_record::{EntityRecord, state_at};
use crate::models::temporal_entity::{TemporalEntity, TemporalInstance};
use crate::query::time::TimeQuery;
use crate::services::created_at::CreatedAtResolver;
use crate::storage::repository::{InstanceQuery, SortOrder, TemporalRepository};

/// 重建请求
#[derive(Debug, Clone)]
pub struct ReconstructionRequest<'a> {
    pub time: &'a TimeQuery,
    /// 展开后的属性 ID，为空表示全部属性
    pub attributes: &'a [String],
    pub last_n: Option<u32>,
}

/// 重建结果
#[derive(Debug, Clone, Default)]
pub struct Reconstruction {
    /// 按实体 ID 排序
    pub entities: Vec<TemporalEntity>,
    /// 有属性的实例数超过了份额
    pub limited: bool,
}

pub struct TemporalEntityReconstructor {
    repository: Arc<dyn TemporalRepository>,
    governor: ResultGovernor,
}

impl TemporalEntityReconstructor {
    pub fn new(repository: Arc<dyn TemporalRepository>, governor: ResultGovernor) -> Self {
        Self {
            repository,
            governor,
        }
    }

    pub async fn reconstruct(
        &self,
        intervals: &[EntityInterval],
        request: &ReconstructionRequest<'_>,
    ) -> Result<Reconstruction> {
        let mut entity_ids: Vec<String> = intervals.iter().map(|i| i.entity_id.clone()).collect();
        entity_ids.sort();
        entity_ids.dedup();
        if entity_ids.is_empty() {
            return Ok(Reconstruction::default());
        }

        let attribute_count = if request.attributes.is_empty() {
            self.repository.max_attribute_count(&entity_ids).await?
        } else {
            request.attributes.len()
        };
        let budget = self
            .governor
            .budget(request.last_n, entity_ids.len(), attribute_count);
        let order = if request.last_n.is_some() {
            SortOrder::Descending
        } else {
            SortOrder::Ascending
        };

        let mut resolver = CreatedAtResolver::new(self.repository.clone());
        let mut records: HashMap<String, Vec<EntityRecord>> = HashMap::new();
        let mut entities: BTreeMap<String, TemporalEntity> = BTreeMap::new();
        let mut limited = budget.limited;

        for interval in intervals {
            let instances = self
                .repository
                .attribute_instances(&InstanceQuery {
                    interval: interval.clone(),
                    time: request.time.clone(),
                    attributes: request.attributes.to_vec(),
                    limit: budget.fetch_limit(),
                    order,
                })
                .await?;

            let mut per_attribute: BTreeMap<String, Vec<AttributeInstance>> = BTreeMap::new();
            for instance in instances {
                per_attribute
                    .entry(instance.attribute_id.clone())
                    .or_default()
                    .push(instance);
            }
            for rows in per_attribute.values_mut() {
                if budget.exceeded_by(rows.len()) {
                    rows.truncate(budget.per_attribute as usize);
                    limited = true;
                }
            }

            let parents: Vec<String> = per_attribute
                .values()
                .flatten()
                .filter(|i| i.has_sub_attributes)
                .map(|i| i.instance_id.clone())
                .collect();
            let sub_instances = if parents.is_empty() {
                Vec::new()
            } else {
                self.repository.sub_attribute_instances(&parents).await?
            };

            if !records.contains_key(&interval.entity_id) {
                let fetched = self.repository.entity_records(&interval.entity_id).await?;
                records.insert(interval.entity_id.clone(), fetched);
            }
            let entity_records = records
                .get(&interval.entity_id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let mut entity = entity_shell(&interval.entity_id, entity_records, interval);

            for (attribute_id, rows) in per_attribute {
                let mut rebuilt = Vec::with_capacity(rows.len());
                for instance in rows {
                    let created_at = resolver
                        .resolve(&instance.entity_id, &attribute_id, instance.ts)
                        .await?;
                    rebuilt.push(TemporalInstance {
                        sub_attributes: nest_sub_attributes(&instance.instance_id, &sub_instances),
                        instance_id: instance.instance_id,
                        value: instance.value,
                        observed_at: instance.observed_at,
                        created_at: Some(created_at),
                        modified_at: Some(instance.ts),
                        dataset_id: instance.dataset_id,
                        unit_code: instance.unit_code,
                    });
                }
                entity.attributes.insert(attribute_id, rebuilt);
            }

            match entities.get_mut(&interval.entity_id) {
                Some(existing) => existing.merge(entity),
                None => {
                    entities.insert(interval.entity_id.clone(), entity);
                }
            }
        }

        let property = request.time.property();
        let entities: Vec<TemporalEntity> = entities
            .into_values()
            .map(|mut entity| {
                entity.sort_instances(property);
                entity
            })
            .collect();
        tracing::debug!(
            entities = entities.len(),
            instances = entities.iter().map(TemporalEntity::instance_count).sum::<usize>(),
            limited,
            "temporal entities reconstructed"
        );
        Ok(Reconstruction { entities, limited })
    }
}

/// 区间末端时刻的实体状态决定类型与系统时间，区间末端实体不存在时退回当前状态
fn entity_shell(
    entity_id: &str,
    records: &[EntityRecord],
    interval: &EntityInterval,
) -> TemporalEntity {
    let state = state_at(records, interval.end).or_else(|| state_at(records, Utc::now()));
    let entity_type = state
        .as_ref()
        .map(|s| s.entity_type.clone())
        .or_else(|| records.last().map(|r| r.entity_type.clone()))
        .unwrap_or_default();
    let mut entity = TemporalEntity::new(entity_id, &entity_type);
    if let Some(state) = state {
        entity.created_at = state.created_at;
        entity.modified_at = Some(state.modified_at);
    }
    entity
}

/// 子属性的 createdAt 与 modifiedAt 都取其自身时间
fn nest_sub_attributes(
    parent_instance_id: &str,
    sub_instances: &[SubAttributeInstance],
) -> BTreeMap<String, Vec<TemporalInstance>> {
    let mut nested: BTreeMap<String, Vec<TemporalInstance>> = BTreeMap::new();
    for sub in sub_instances
        .iter()
        .filter(|s| s.parent_instance_id == parent_instance_id)
    {
        nested
            .entry(sub.attribute_id.clone())
            .or_default()
            .push(TemporalInstance {
                instance_id: sub.instance_id.clone(),
                value: sub.value.clone(),
                observed_at: sub.observed_at,
                created_at: Some(sub.ts),
                modified_at: Some(sub.ts),
                dataset_id: sub.dataset_id.clone(),
                unit_code: sub.unit_code.clone(),
                sub_attributes: BTreeMap::new(),
            });
    }
    nested
}
