//! 时间谓词
//!
//! `timerel`/`time`/`endTime`/`timeproperty` 组合的校验与时间窗口计算。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, Result};

/// 时间下界哨兵
pub const LOW_WATER_MARK: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;

/// 时间上界哨兵（9999-12-31T23:59:59Z）
pub fn high_water_mark() -> DateTime<Utc> {
    DateTime::from_timestamp(253_402_300_799, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// 时间关系
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeRelation {
    Before,
    After,
    Between,
}

impl TimeRelation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRelation::Before => "before",
            TimeRelation::After => "after",
            TimeRelation::Between => "between",
        }
    }
}

impl FromStr for TimeRelation {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "before" => Ok(TimeRelation::Before),
            "after" => Ok(TimeRelation::After),
            "between" => Ok(TimeRelation::Between),
            other => Err(AppError::InvalidTimeRelation(format!(
                "unknown timerel '{other}'"
            ))),
        }
    }
}

/// 用于时间过滤的时间属性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimeProperty {
    #[default]
    ObservedAt,
    CreatedAt,
    ModifiedAt,
}

impl TimeProperty {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeProperty::ObservedAt => "observedAt",
            TimeProperty::CreatedAt => "createdAt",
            TimeProperty::ModifiedAt => "modifiedAt",
        }
    }
}

impl fmt::Display for TimeProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeProperty {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "observedAt" => Ok(TimeProperty::ObservedAt),
            "createdAt" => Ok(TimeProperty::CreatedAt),
            "modifiedAt" => Ok(TimeProperty::ModifiedAt),
            other => Err(AppError::InvalidQuery(format!(
                "unsupported timeproperty '{other}'"
            ))),
        }
    }
}

/// 闭区间时间窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }
}

/// 时间谓词
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeQuery {
    relation: Option<TimeRelation>,
    time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    property: TimeProperty,
    inclusive: bool,
}

impl TimeQuery {
    /// 从请求参数构造
    pub fn new(
        timerel: Option<&str>,
        time: Option<&str>,
        end_time: Option<&str>,
        timeproperty: Option<&str>,
        inclusive: bool,
    ) -> Result<Self> {
        let relation = timerel.map(str::parse).transpose()?;
        let time = time.map(|t| parse_timestamp("time", t)).transpose()?;
        let end_time = end_time
            .map(|t| parse_timestamp("endTime", t))
            .transpose()?;
        let property = timeproperty
            .map(str::parse)
            .transpose()?
            .unwrap_or_default();
        Self::from_parts(relation, time, end_time, property, inclusive)
    }

    /// 校验关系与时间边界组合
    pub fn from_parts(
        relation: Option<TimeRelation>,
        time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
        property: TimeProperty,
        inclusive: bool,
    ) -> Result<Self> {
        match (relation, time, end_time) {
            (None, None, None) => {}
            (Some(TimeRelation::Before | TimeRelation::After), Some(_), None) => {}
            (Some(TimeRelation::Between), Some(start), Some(end)) => {
                if end < start {
                    return Err(AppError::InvalidTimeRelation(
                        "endTime must not precede time".to_string(),
                    ));
                }
            }
            (Some(TimeRelation::Between), _, _) => {
                return Err(AppError::InvalidTimeRelation(
                    "between requires both time and endTime".to_string(),
                ));
            }
            (Some(relation), _, _) => {
                return Err(AppError::InvalidTimeRelation(format!(
                    "{} requires time and no endTime",
                    relation.as_str()
                )));
            }
            (None, _, _) => {
                return Err(AppError::InvalidTimeRelation(
                    "time and endTime require timerel".to_string(),
                ));
            }
        }
        Ok(Self {
            relation,
            time,
            end_time,
            property,
            inclusive,
        })
    }

    /// 无时间边界，只要求时间属性存在
    pub fn unbounded(property: TimeProperty) -> Self {
        Self {
            relation: None,
            time: None,
            end_time: None,
            property,
            inclusive: true,
        }
    }

    pub fn relation(&self) -> Option<TimeRelation> {
        self.relation
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn property(&self) -> TimeProperty {
        self.property
    }

    pub fn inclusive(&self) -> bool {
        self.inclusive
    }

    pub fn is_unbounded(&self) -> bool {
        self.relation.is_none()
    }

    /// BEFORE/AFTER 只有一个参考点，窗口外的初始状态需要补齐
    pub fn requires_boundary_synthesis(&self) -> bool {
        matches!(
            self.relation,
            Some(TimeRelation::Before | TimeRelation::After)
        )
    }

    /// 外层时间窗口，缺失的一侧取哨兵值
    pub fn window(&self) -> TimeWindow {
        match (self.relation, self.time, self.end_time) {
            (Some(TimeRelation::Before), Some(t), _) => TimeWindow::new(LOW_WATER_MARK, t),
            (Some(TimeRelation::After), Some(t), _) => TimeWindow::new(t, high_water_mark()),
            (Some(TimeRelation::Between), Some(t), Some(end)) => TimeWindow::new(t, end),
            _ => TimeWindow::new(LOW_WATER_MARK, high_water_mark()),
        }
    }

    /// 时间点是否满足谓词
    pub fn accepts(&self, t: DateTime<Utc>) -> bool {
        match (self.relation, self.time, self.end_time) {
            (Some(TimeRelation::Before), Some(bound), _) => {
                if self.inclusive {
                    t <= bound
                } else {
                    t < bound
                }
            }
            (Some(TimeRelation::After), Some(bound), _) => {
                if self.inclusive {
                    t >= bound
                } else {
                    t > bound
                }
            }
            (Some(TimeRelation::Between), Some(start), Some(end)) => {
                if self.inclusive {
                    start <= t && t <= end
                } else {
                    start < t && t < end
                }
            }
            _ => true,
        }
    }
}

fn parse_timestamp(name: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AppError::InvalidQuery(format!("{name} '{raw}' is not a date-time: {e}")))
}
