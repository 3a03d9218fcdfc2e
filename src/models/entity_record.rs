//! 实体生命周期记录

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::attribute::OperationMode;

/// 实体生命周期事件（Create/Update/Replace/Delete）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_id: String,
    pub entity_type: String,
    pub operation_mode: OperationMode,
    pub ts: DateTime<Utc>,
}

/// 某一参考时间点上实体的存在状态
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    pub entity_type: String,
    /// 当前生命周期的创建时间
    pub created_at: Option<DateTime<Utc>>,
    /// 最近一次非删除记录的时间
    pub modified_at: DateTime<Utc>,
}

/// 计算参考时间点上的实体状态
///
/// 参考时间之前（含）最近一条非 Delete 记录定义实体状态；若其后（仍在参考时间之前）
/// 出现 Delete 记录，则实体视为不存在。
pub fn state_at(records: &[EntityRecord], reference: DateTime<Utc>) -> Option<EntityState> {
    let mut ordered: Vec<&EntityRecord> = records.iter().filter(|r| r.ts <= reference).collect();
    ordered.sort_by_key(|r| r.ts);

    let latest = ordered.last()?;
    if latest.operation_mode == OperationMode::Delete {
        return None;
    }

    let created_at = ordered
        .iter()
        .rev()
        .take_while(|r| r.operation_mode != OperationMode::Delete)
        .filter(|r| r.operation_mode == OperationMode::Create)
        .map(|r| r.ts)
        .last();

    Some(EntityState {
        entity_type: latest.entity_type.clone(),
        created_at,
        modified_at: latest.ts,
    })
}
