use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::{AppError, Result};
use crate::interval::{EntityInterval, IntervalPage, IntervalPlan};
use crate::models::attribute::{AttributeInstance, SubAttributeInstance};
use crate::models::entity_record::EntityRecord;
use crate::query::time::TimeQuery;

/// 候选实体过滤条件
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityFilter {
    pub ids: Vec<String>,
    pub id_pattern: Option<String>,
    /// 展开后的实体类型
    pub types: Vec<String>,
}

impl EntityFilter {
    /// 编译 idPattern，非法时返回 InvalidQuery
    pub fn compiled_pattern(&self) -> Result<Option<Regex>> {
        self.id_pattern
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    AppError::InvalidQuery(format!("invalid idPattern '{pattern}': {e}"))
                })
            })
            .transpose()
    }

    pub fn accepts(&self, entity_id: &str, entity_type: &str, pattern: Option<&Regex>) -> bool {
        (self.ids.is_empty() || self.ids.iter().any(|id| id == entity_id))
            && (self.types.is_empty() || self.types.iter().any(|t| t == entity_type))
            && pattern.is_none_or(|p| p.is_match(entity_id))
    }
}

/// 分页请求
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    /// 本页第一个实体的 ID
    pub anchor: Option<String>,
    pub size: u32,
    /// 是否统计实体总数
    pub count: bool,
}

/// 区间查询
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalQuery {
    pub filter: EntityFilter,
    pub time: TimeQuery,
    /// 为空时区间为整个时间窗口
    pub plan: Option<IntervalPlan>,
    /// 为空时返回全部实体
    pub page: Option<PageRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// 一个区间内的属性实例查询
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceQuery {
    pub interval: EntityInterval,
    pub time: TimeQuery,
    /// 为空时返回全部属性
    pub attributes: Vec<String>,
    /// 每个属性最多返回的行数
    pub limit: u32,
    /// lastN 检索时按时间倒序取最近的实例
    pub order: SortOrder,
}

/// 时态数据仓储
///
/// 只读访问属性实例日志、子属性日志和实体记录。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TemporalRepository: Send + Sync {
    /// 计算满足条件的实体区间
    async fn find_intervals(&self, query: &IntervalQuery) -> Result<IntervalPage>;

    /// 实体生命周期记录，按时间升序
    async fn entity_records(&self, entity_id: &str) -> Result<Vec<EntityRecord>>;

    /// 区间内的属性实例
    async fn attribute_instances(&self, query: &InstanceQuery) -> Result<Vec<AttributeInstance>>;

    /// 给定父实例的子属性实例，按时间升序
    async fn sub_attribute_instances(
        &self,
        parent_instance_ids: &[String],
    ) -> Result<Vec<SubAttributeInstance>>;

    /// 属性的全部 Create 时间，升序
    async fn create_timestamps(
        &self,
        entity_id: &str,
        attribute_id: &str,
    ) -> Result<Vec<DateTime<Utc>>>;

    /// 给定实体中拥有最多不同属性的实体的属性数
    async fn max_attribute_count(&self, entity_ids: &[String]) -> Result<usize>;
}
