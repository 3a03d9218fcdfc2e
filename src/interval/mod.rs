//! 区间模块
//!
//! 把属性/地理谓词编译为每个实体上谓词成立的最大时间区间：
//! - `algebra`: 与存储无关的区间运算（折叠、交、并、分页）
//! - `plan`: 由查询条件和地理谓词构造的区间计划
//! - `governor`: 返回行数控制

pub mod algebra;
pub mod governor;
pub mod plan;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use algebra::TimelinePoint;
pub use governor::{InstanceBudget, ResultGovernor};
pub use plan::{IntervalPlan, PlanLeaf};

/// 实体上谓词持续成立的一个闭区间
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityInterval {
    pub entity_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl EntityInterval {
    pub fn new(entity_id: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.into(),
            start,
            end,
        }
    }

    pub fn overlaps(&self, other: &EntityInterval) -> bool {
        self.entity_id == other.entity_id && self.start <= other.end && other.start <= self.end
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }
}

/// 一页区间结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntervalPage {
    /// 按 (实体 ID, 开始时间) 排序
    pub intervals: Vec<EntityInterval>,
    pub next_anchor: Option<String>,
    pub prev_anchor: Option<String>,
    /// 满足条件的实体总数，仅在请求计数时提供
    pub total_entities: Option<u64>,
}

impl IntervalPage {
    /// 页内实体 ID，保持顺序并去重
    pub fn entity_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for interval in &self.intervals {
            if ids.last() != Some(&interval.entity_id) {
                ids.push(interval.entity_id.clone());
            }
        }
        ids
    }
}
