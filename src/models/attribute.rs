//! 属性实例模型
//!
//! 属性实例是实体某个属性的一次历史写入，构成只追加的日志。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;
use crate::query::time::TimeProperty;

/// 写入操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationMode {
    Create,
    Append,
    Update,
    Replace,
    Delete,
}

impl OperationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationMode::Create => "Create",
            OperationMode::Append => "Append",
            OperationMode::Update => "Update",
            OperationMode::Replace => "Replace",
            OperationMode::Delete => "Delete",
        }
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Create" => Ok(OperationMode::Create),
            "Append" => Ok(OperationMode::Append),
            "Update" => Ok(OperationMode::Update),
            "Replace" => Ok(OperationMode::Replace),
            "Delete" => Ok(OperationMode::Delete),
            other => Err(AppError::PersistenceRetrievalFailure(format!(
                "unknown operation mode: {other}"
            ))),
        }
    }
}

/// 几何类型，对应存储中的五个几何列之一
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    Point,
    LineString,
    Polygon,
    MultiLineString,
    MultiPolygon,
}

impl GeometryKind {
    pub const ALL: [GeometryKind; 5] = [
        GeometryKind::Point,
        GeometryKind::LineString,
        GeometryKind::Polygon,
        GeometryKind::MultiLineString,
        GeometryKind::MultiPolygon,
    ];

    pub fn of(value: &geojson::Value) -> Option<Self> {
        match value {
            geojson::Value::Point(_) => Some(GeometryKind::Point),
            geojson::Value::LineString(_) => Some(GeometryKind::LineString),
            geojson::Value::Polygon(_) => Some(GeometryKind::Polygon),
            geojson::Value::MultiLineString(_) => Some(GeometryKind::MultiLineString),
            geojson::Value::MultiPolygon(_) => Some(GeometryKind::MultiPolygon),
            _ => None,
        }
    }

    /// 存储列名
    pub fn column(&self) -> &'static str {
        match self {
            GeometryKind::Point => "geo_point",
            GeometryKind::LineString => "geo_linestring",
            GeometryKind::Polygon => "geo_polygon",
            GeometryKind::MultiLineString => "geo_multilinestring",
            GeometryKind::MultiPolygon => "geo_multipolygon",
        }
    }
}

/// 属性值，恰好一个分支有值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum AttributeValue {
    String(String),
    Number(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    Compound(serde_json::Value),
    Relationship(String),
    Geometry(geojson::Geometry),
}

impl AttributeValue {
    /// NGSI-LD 属性类型
    pub fn attribute_type(&self) -> &'static str {
        match self {
            AttributeValue::Relationship(_) => "Relationship",
            AttributeValue::Geometry(_) => "GeoProperty",
            _ => "Property",
        }
    }

    /// 值在响应中所用的成员名
    pub fn member_name(&self) -> &'static str {
        match self {
            AttributeValue::Relationship(_) => "object",
            _ => "value",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttributeValue::String(s) => serde_json::Value::String(s.clone()),
            AttributeValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            AttributeValue::Boolean(b) => serde_json::Value::Bool(*b),
            AttributeValue::DateTime(dt) => serde_json::json!({
                "@type": "DateTime",
                "@value": dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            }),
            AttributeValue::Compound(v) => v.clone(),
            AttributeValue::Relationship(target) => serde_json::Value::String(target.clone()),
            AttributeValue::Geometry(g) => serde_json::to_value(g).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn geometry_kind(&self) -> Option<GeometryKind> {
        match self {
            AttributeValue::Geometry(g) => GeometryKind::of(&g.value),
            _ => None,
        }
    }
}

/// 属性实例
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeInstance {
    /// 实例 ID
    pub instance_id: String,
    /// 所属实体 ID
    pub entity_id: String,
    /// 展开后的属性 ID
    pub attribute_id: String,
    /// 写入操作类型
    pub operation_mode: OperationMode,
    /// 属性值（删除记录不带值）
    pub value: Option<AttributeValue>,
    /// 调用方提供的观测时间
    pub observed_at: Option<DateTime<Utc>>,
    /// 存储分配的生效时间
    pub ts: DateTime<Utc>,
    /// 多实例区分标识
    pub dataset_id: Option<String>,
    /// 单位代码
    pub unit_code: Option<String>,
    /// 是否带有子属性
    pub has_sub_attributes: bool,
}

impl AttributeInstance {
    /// 按时间属性取时间戳；createdAt 只对 Create 记录有定义
    pub fn time_of(&self, property: TimeProperty) -> Option<DateTime<Utc>> {
        match property {
            TimeProperty::ObservedAt => self.observed_at,
            TimeProperty::ModifiedAt => Some(self.ts),
            TimeProperty::CreatedAt => {
                (self.operation_mode == OperationMode::Create).then_some(self.ts)
            }
        }
    }
}

/// 子属性实例，挂在父实例下
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAttributeInstance {
    pub instance_id: String,
    pub parent_instance_id: String,
    pub attribute_id: String,
    pub value: Option<AttributeValue>,
    pub observed_at: Option<DateTime<Utc>>,
    pub ts: DateTime<Utc>,
    pub dataset_id: Option<String>,
    pub unit_code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_mode_round_trip() {
        for mode in [
            OperationMode::Create,
            OperationMode::Append,
            OperationMode::Update,
            OperationMode::Replace,
            OperationMode::Delete,
        ] {
            assert_eq!(mode.as_str().parse::<OperationMode>().unwrap(), mode);
        }
        assert!("Upsert".parse::<OperationMode>().is_err());
    }

    #[test]
    fn test_geometry_kind_maps_to_column() {
        let point = geojson::Value::Point(vec![2.35, 48.85]);
        assert_eq!(GeometryKind::of(&point), Some(GeometryKind::Point));
        assert_eq!(GeometryKind::Point.column(), "geo_point");
        let multi_point = geojson::Value::MultiPoint(vec![vec![0.0, 0.0]]);
        assert_eq!(GeometryKind::of(&multi_point), None);
    }

    #[test]
    fn test_value_json_shapes() {
        assert_eq!(
            AttributeValue::Number(21.5).to_json(),
            serde_json::json!(21.5)
        );
        assert_eq!(
            AttributeValue::Relationship("urn:ngsi-ld:Building:1".into()).member_name(),
            "object"
        );
        let geometry = AttributeValue::Geometry(geojson::Geometry::new(geojson::Value::Point(
            vec![2.35, 48.85],
        )));
        assert_eq!(geometry.attribute_type(), "GeoProperty");
        assert_eq!(geometry.to_json()["type"], "Point");
    }
}
