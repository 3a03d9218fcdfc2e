//! 实体时态表示
//!
//! 由一个或多个时间区间内的属性实例重建出的实体，以及其 JSON 输出形态。

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use crate::context::ResolvedContext;
use crate::models::attribute::AttributeValue;
use crate::query::time::TimeProperty;

const NULL_URI: &str = "urn:ngsi-ld:null";

pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// 输出选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// 只输出 (值, 时间戳) 对
    pub temporal_values: bool,
    /// 每个实例都带 createdAt 和 modifiedAt
    pub sys_attrs: bool,
    /// 当前使用的时间属性
    pub time_property: TimeProperty,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            temporal_values: false,
            sys_attrs: false,
            time_property: TimeProperty::ObservedAt,
        }
    }
}

/// 重建后的一个属性实例
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalInstance {
    pub instance_id: String,
    pub value: Option<AttributeValue>,
    pub observed_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub dataset_id: Option<String>,
    pub unit_code: Option<String>,
    /// 子属性 ID -> 子属性实例
    pub sub_attributes: BTreeMap<String, Vec<TemporalInstance>>,
}

impl TemporalInstance {
    pub fn timestamp(&self, property: TimeProperty) -> Option<DateTime<Utc>> {
        match property {
            TimeProperty::ObservedAt => self.observed_at,
            TimeProperty::CreatedAt => self.created_at,
            TimeProperty::ModifiedAt => self.modified_at,
        }
    }

    fn attribute_type(&self) -> &'static str {
        self.value
            .as_ref()
            .map(AttributeValue::attribute_type)
            .unwrap_or("Property")
    }

    fn to_json(&self, options: &RenderOptions, context: &ResolvedContext) -> Value {
        let mut object = Map::new();
        object.insert("type".into(), json!(self.attribute_type()));
        match &self.value {
            Some(value) => {
                object.insert(value.member_name().into(), value.to_json());
            }
            None => {
                object.insert("value".into(), json!(NULL_URI));
            }
        }
        object.insert("instanceId".into(), json!(self.instance_id));
        if let Some(observed_at) = &self.observed_at {
            object.insert("observedAt".into(), json!(format_datetime(observed_at)));
        }
        let with_created =
            options.sys_attrs || options.time_property == TimeProperty::CreatedAt;
        let with_modified =
            options.sys_attrs || options.time_property == TimeProperty::ModifiedAt;
        if with_created && let Some(created_at) = &self.created_at {
            object.insert("createdAt".into(), json!(format_datetime(created_at)));
        }
        if with_modified && let Some(modified_at) = &self.modified_at {
            object.insert("modifiedAt".into(), json!(format_datetime(modified_at)));
        }
        if let Some(dataset_id) = &self.dataset_id {
            object.insert("datasetId".into(), json!(dataset_id));
        }
        if let Some(unit_code) = &self.unit_code {
            object.insert("unitCode".into(), json!(unit_code));
        }
        for (sub_id, subs) in &self.sub_attributes {
            let rendered: Vec<Value> = subs.iter().map(|s| s.to_json(options, context)).collect();
            let rendered = match <[Value; 1]>::try_from(rendered) {
                Ok([single]) => single,
                Err(many) => Value::Array(many),
            };
            object.insert(context.compact(sub_id), rendered);
        }
        Value::Object(object)
    }
}

/// 实体时态表示
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalEntity {
    pub id: String,
    pub entity_type: String,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    /// 属性 ID -> 实例列表
    pub attributes: BTreeMap<String, Vec<TemporalInstance>>,
}

impl TemporalEntity {
    pub fn new(id: &str, entity_type: &str) -> Self {
        Self {
            id: id.to_string(),
            entity_type: entity_type.to_string(),
            created_at: None,
            modified_at: None,
            attributes: BTreeMap::new(),
        }
    }

    /// 合并同一实体另一个区间的结果
    ///
    /// 属性实例列表直接拼接；createdAt 取最早，modifiedAt 取最晚；类型不一致时保留先出现的类型。
    pub fn merge(&mut self, other: TemporalEntity) {
        if other.entity_type != self.entity_type {
            tracing::warn!(
                entity_id = %self.id,
                kept = %self.entity_type,
                ignored = %other.entity_type,
                "entity type differs across temporal intervals, keeping first seen type"
            );
        }
        self.created_at = match (self.created_at, other.created_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.modified_at = match (self.modified_at, other.modified_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        for (attribute_id, instances) in other.attributes {
            self.attributes
                .entry(attribute_id)
                .or_default()
                .extend(instances);
        }
    }

    /// 每个属性的实例按时间升序排列，并去掉区间重叠带来的重复实例
    pub fn sort_instances(&mut self, property: TimeProperty) {
        for instances in self.attributes.values_mut() {
            instances.sort_by(|a, b| {
                a.timestamp(property)
                    .cmp(&b.timestamp(property))
                    .then_with(|| a.instance_id.cmp(&b.instance_id))
            });
            instances.dedup_by(|a, b| a.instance_id == b.instance_id);
        }
    }

    pub fn instance_count(&self) -> usize {
        self.attributes.values().map(Vec::len).sum()
    }

    /// 输出 JSON 表示
    pub fn to_json(
        &self,
        options: &RenderOptions,
        context: &ResolvedContext,
        context_urls: &[String],
    ) -> Value {
        let mut object = Map::new();
        object.insert("id".into(), json!(self.id));
        object.insert("type".into(), json!(context.compact(&self.entity_type)));
        if options.sys_attrs {
            if let Some(created_at) = &self.created_at {
                object.insert("createdAt".into(), json!(format_datetime(created_at)));
            }
            if let Some(modified_at) = &self.modified_at {
                object.insert("modifiedAt".into(), json!(format_datetime(modified_at)));
            }
        }

        for (attribute_id, instances) in &self.attributes {
            let rendered = if options.temporal_values {
                temporal_values(instances, options.time_property)
            } else {
                Value::Array(
                    instances
                        .iter()
                        .map(|i| i.to_json(options, context))
                        .collect(),
                )
            };
            object.insert(context.compact(attribute_id), rendered);
        }

        let context_value = match context_urls {
            [single] => json!(single),
            many => json!(many),
        };
        object.insert("@context".into(), context_value);
        Value::Object(object)
    }
}

fn temporal_values(instances: &[TemporalInstance], property: TimeProperty) -> Value {
    let attribute_type = instances
        .first()
        .map(TemporalInstance::attribute_type)
        .unwrap_or("Property");
    let member = if attribute_type == "Relationship" {
        "objects"
    } else {
        "values"
    };
    let pairs: Vec<Value> = instances
        .iter()
        .map(|instance| {
            let value = instance
                .value
                .as_ref()
                .map(AttributeValue::to_json)
                .unwrap_or_else(|| json!(NULL_URI));
            let timestamp = instance
                .timestamp(property)
                .map(|t| json!(format_datetime(&t)))
                .unwrap_or(Value::Null);
            json!([value, timestamp])
        })
        .collect();
    let mut object = Map::new();
    object.insert("type".into(), json!(attribute_type));
    object.insert(member.into(), Value::Array(pairs));
    Value::Object(object)
}
