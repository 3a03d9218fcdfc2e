//! 区间代数
//!
//! 纯函数实现，输入输出都按 (实体 ID, 时间) 排序。存储下推的 SQL 形式与此处语义一致。

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::interval::{EntityInterval, IntervalPage};
use crate::query::time::TimeQuery;

/// 谓词时间线上的一个采样点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelinePoint {
    pub entity_id: String,
    pub time: DateTime<Utc>,
    pub result: bool,
}

impl TimelinePoint {
    pub fn new(entity_id: impl Into<String>, time: DateTime<Utc>, result: bool) -> Self {
        Self {
            entity_id: entity_id.into(),
            time,
            result,
        }
    }
}

/// 从原始时间线得到区间：窗口过滤、边界补齐，再折叠
pub fn timeline_intervals(points: Vec<TimelinePoint>, time: &TimeQuery) -> Vec<EntityInterval> {
    let timeline = if time.requires_boundary_synthesis() {
        synthesize_boundaries(points, time)
    } else {
        points.into_iter().filter(|p| time.accepts(p.time)).collect()
    };
    collapse(timeline)
}

/// BEFORE/AFTER 的边界补齐
///
/// 每个实体窗口开始前（含被排他边界排除的起点）最后一个结果延伸到窗口起点；
/// 窗口内最后一个结果延伸到窗口终点，窗口内没有样本时沿用起点的结果。
pub fn synthesize_boundaries(
    mut points: Vec<TimelinePoint>,
    time: &TimeQuery,
) -> Vec<TimelinePoint> {
    let window = time.window();
    sort_points(&mut points);

    let mut before: HashMap<String, bool> = HashMap::new();
    let mut last_inside: HashMap<String, bool> = HashMap::new();
    let mut timeline = Vec::with_capacity(points.len());
    for point in points {
        if time.accepts(point.time) {
            last_inside.insert(point.entity_id.clone(), point.result);
            timeline.push(point);
        } else if point.time <= window.start {
            before.insert(point.entity_id, point.result);
        }
    }
    for (entity_id, result) in &before {
        last_inside.entry(entity_id.clone()).or_insert(*result);
        timeline.push(TimelinePoint::new(entity_id.clone(), window.start, *result));
    }
    for (entity_id, result) in last_inside {
        timeline.push(TimelinePoint::new(entity_id, window.end, result));
    }
    timeline
}

/// 连续相同结果折叠为区间，只保留结果为 true 的区间
///
/// 分组键为 `rank(entity, time) - rank(entity, result, time)`，在同一段连续相同结果内保持不变。
pub fn collapse(mut points: Vec<TimelinePoint>) -> Vec<EntityInterval> {
    sort_points(&mut points);

    let mut overall: HashMap<&str, i64> = HashMap::new();
    let mut by_result: HashMap<(&str, bool), i64> = HashMap::new();
    let mut groups: Vec<((&str, i64), DateTime<Utc>, DateTime<Utc>)> = Vec::new();
    let mut index: HashMap<(&str, i64), usize> = HashMap::new();

    for point in &points {
        let rank = overall.entry(point.entity_id.as_str()).or_insert(0);
        *rank += 1;
        let result_rank = by_result
            .entry((point.entity_id.as_str(), point.result))
            .or_insert(0);
        *result_rank += 1;
        if !point.result {
            continue;
        }
        let key = (point.entity_id.as_str(), *rank - *result_rank);
        match index.get(&key) {
            Some(&slot) => {
                let group = &mut groups[slot];
                group.1 = group.1.min(point.time);
                group.2 = group.2.max(point.time);
            }
            None => {
                index.insert(key, groups.len());
                groups.push((key, point.time, point.time));
            }
        }
    }

    let mut intervals: Vec<EntityInterval> = groups
        .into_iter()
        .map(|((entity_id, _), start, end)| EntityInterval::new(entity_id, start, end))
        .collect();
    sort_intervals(&mut intervals);
    intervals
}

/// AND：同一实体上重叠区间两两相交
pub fn intersect(a: &[EntityInterval], b: &[EntityInterval]) -> Vec<EntityInterval> {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    sort_intervals(&mut a);
    sort_intervals(&mut b);

    let mut result = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let (left, right) = (&a[i], &b[j]);
        match left.entity_id.cmp(&right.entity_id) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                if left.overlaps(right) {
                    result.push(EntityInterval::new(
                        left.entity_id.clone(),
                        left.start.max(right.start),
                        left.end.min(right.end),
                    ));
                }
                if left.end <= right.end {
                    i += 1;
                } else {
                    j += 1;
                }
            }
        }
    }
    result
}

/// OR：重叠区间合并，其余区间原样保留
pub fn union(a: &[EntityInterval], b: &[EntityInterval]) -> Vec<EntityInterval> {
    let mut all = Vec::with_capacity(a.len() + b.len());
    all.extend_from_slice(a);
    all.extend_from_slice(b);
    normalize(all)
}

/// 排序并合并同一实体上重叠的区间
pub fn normalize(mut intervals: Vec<EntityInterval>) -> Vec<EntityInterval> {
    sort_intervals(&mut intervals);
    let mut merged: Vec<EntityInterval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        match merged.last_mut() {
            Some(last) if last.overlaps(&interval) => {
                last.end = last.end.max(interval.end);
            }
            _ => merged.push(interval),
        }
    }
    merged
}

/// 按实体 ID 字典序分页
///
/// 锚点实体所在行号（不存在时为 1）起取 `page_size` 个实体；前后页锚点为行号 ±page_size。
pub fn paginate(
    intervals: Vec<EntityInterval>,
    anchor: Option<&str>,
    page_size: usize,
) -> IntervalPage {
    let intervals = {
        let mut sorted = intervals;
        sort_intervals(&mut sorted);
        sorted
    };
    let mut ids: Vec<&str> = intervals.iter().map(|i| i.entity_id.as_str()).collect();
    ids.dedup();

    let size = page_size.max(1);
    let position = anchor
        .and_then(|anchor| ids.iter().position(|id| *id == anchor))
        .unwrap_or(0);
    let end = (position + size).min(ids.len());
    let page_ids = &ids[position.min(ids.len())..end];

    let next_anchor = ids.get(position + size).map(|id| id.to_string());
    let prev_anchor = (position > 0)
        .then(|| ids[position.saturating_sub(size)])
        .map(str::to_string);
    let total = ids.len() as u64;

    let selected: Vec<EntityInterval> = intervals
        .iter()
        .filter(|i| page_ids.binary_search(&i.entity_id.as_str()).is_ok())
        .cloned()
        .collect();

    IntervalPage {
        intervals: selected,
        next_anchor,
        prev_anchor,
        total_entities: Some(total),
    }
}

fn sort_points(points: &mut [TimelinePoint]) {
    points.sort_by(|a, b| {
        a.entity_id
            .cmp(&b.entity_id)
            .then(a.time.cmp(&b.time))
            .then(a.result.cmp(&b.result))
    });
}

fn sort_intervals(intervals: &mut [EntityInterval]) {
    intervals.sort_by(|a, b| {
        a.entity_id
            .cmp(&b.entity_id)
            .then(a.start.cmp(&b.start))
            .then(a.end.cmp(&b.end))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::time::{LOW_WATER_MARK, TimeProperty, TimeRelation};
    use chrono::{Duration, TimeZone};
    use rstest::rstest;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn timeline(entity: &str, pattern: &str) -> Vec<TimelinePoint> {
        pattern
            .chars()
            .enumerate()
            .map(|(i, c)| TimelinePoint::new(entity, at(i as i64), c == '1'))
            .collect()
    }

    fn covered(intervals: &[EntityInterval], entity: &str, t: DateTime<Utc>) -> bool {
        intervals
            .iter()
            .any(|i| i.entity_id == entity && i.contains(t))
    }

    #[test]
    fn test_collapse_runs() {
        let intervals = collapse(timeline("urn:a", "0111001101"));
        assert_eq!(
            intervals,
            vec![
                EntityInterval::new("urn:a", at(1), at(3)),
                EntityInterval::new("urn:a", at(6), at(7)),
                EntityInterval::new("urn:a", at(9), at(9)),
            ]
        );
    }

    #[test]
    fn test_collapse_keeps_entities_apart() {
        let mut points = timeline("urn:b", "110");
        points.extend(timeline("urn:a", "011"));
        let intervals = collapse(points);
        assert_eq!(
            intervals,
            vec![
                EntityInterval::new("urn:a", at(1), at(2)),
                EntityInterval::new("urn:b", at(0), at(1)),
            ]
        );
    }

    #[rstest]
    #[case("0000000000", "1111111111")]
    #[case("0111001101", "1100110010")]
    #[case("1010101010", "0101010101")]
    #[case("0011111100", "0000110000")]
    #[case("1000000001", "0001111000")]
    fn test_pointwise_truth_tables(#[case] a: &str, #[case] b: &str) {
        let left = collapse(timeline("urn:e", a));
        let right = collapse(timeline("urn:e", b));
        let or = union(&left, &right);
        let and = intersect(&left, &right);

        for (i, (x, y)) in a.chars().zip(b.chars()).enumerate() {
            let t = at(i as i64);
            let (x, y) = (x == '1', y == '1');
            assert_eq!(covered(&or, "urn:e", t), x || y, "OR at sample {i}");
            assert_eq!(covered(&and, "urn:e", t), x && y, "AND at sample {i}");
        }
    }

    #[test]
    fn test_and_with_absent_entity_is_empty() {
        let a = vec![EntityInterval::new("urn:a", at(0), at(10))];
        let b = vec![EntityInterval::new("urn:b", at(0), at(10))];
        assert!(intersect(&a, &b).is_empty());
    }

    #[test]
    fn test_and_containment_yields_inner_interval() {
        let outer = vec![EntityInterval::new("urn:a", at(0), at(30))];
        let inner = vec![EntityInterval::new("urn:a", at(5), at(10))];
        assert_eq!(intersect(&outer, &inner), inner);
        assert_eq!(intersect(&inner, &outer), inner);
    }

    #[test]
    fn test_or_passes_through_disjoint_intervals() {
        let a = vec![EntityInterval::new("urn:a", at(0), at(5))];
        let b = vec![
            EntityInterval::new("urn:a", at(3), at(8)),
            EntityInterval::new("urn:a", at(20), at(25)),
            EntityInterval::new("urn:b", at(1), at(2)),
        ];
        assert_eq!(
            union(&a, &b),
            vec![
                EntityInterval::new("urn:a", at(0), at(8)),
                EntityInterval::new("urn:a", at(20), at(25)),
                EntityInterval::new("urn:b", at(1), at(2)),
            ]
        );
    }

    #[test]
    fn test_after_synthesizes_state_from_before_window() {
        let query = TimeQuery::from_parts(
            Some(TimeRelation::After),
            Some(at(5)),
            None,
            TimeProperty::ObservedAt,
            true,
        )
        .unwrap();
        // true since minute 2, flips to false at minute 8
        let points = vec![
            TimelinePoint::new("urn:a", at(2), true),
            TimelinePoint::new("urn:a", at(8), false),
            TimelinePoint::new("urn:b", at(6), true),
        ];
        let intervals = timeline_intervals(points, &query);
        assert_eq!(
            intervals,
            vec![
                EntityInterval::new("urn:a", at(5), at(5)),
                EntityInterval::new("urn:b", at(6), query.window().end),
            ]
        );
    }

    #[test]
    fn test_after_carries_state_without_samples_in_window() {
        let query = TimeQuery::from_parts(
            Some(TimeRelation::After),
            Some(at(5)),
            None,
            TimeProperty::ObservedAt,
            true,
        )
        .unwrap();
        let points = vec![TimelinePoint::new("urn:a", at(0), true)];
        let intervals = timeline_intervals(points, &query);
        assert_eq!(
            intervals,
            vec![EntityInterval::new("urn:a", at(5), query.window().end)]
        );
    }

    #[test]
    fn test_exclusive_after_keeps_state_set_at_bound() {
        let query = TimeQuery::from_parts(
            Some(TimeRelation::After),
            Some(at(5)),
            None,
            TimeProperty::ObservedAt,
            false,
        )
        .unwrap();
        let points = vec![
            TimelinePoint::new("urn:a", at(5), true),
            TimelinePoint::new("urn:b", at(5), true),
            TimelinePoint::new("urn:b", at(7), false),
        ];
        let intervals = timeline_intervals(points, &query);
        assert_eq!(
            intervals,
            vec![
                EntityInterval::new("urn:a", at(5), query.window().end),
                EntityInterval::new("urn:b", at(5), at(5)),
            ]
        );
    }

    #[test]
    fn test_before_extends_last_state_to_reference_time() {
        let query = TimeQuery::from_parts(
            Some(TimeRelation::Before),
            Some(at(10)),
            None,
            TimeProperty::ObservedAt,
            true,
        )
        .unwrap();
        let points = vec![
            TimelinePoint::new("urn:a", at(1), false),
            TimelinePoint::new("urn:a", at(4), true),
            TimelinePoint::new("urn:a", at(12), false),
        ];
        let intervals = timeline_intervals(points, &query);
        assert_eq!(intervals, vec![EntityInterval::new("urn:a", at(4), at(10))]);
        assert_eq!(query.window().start, LOW_WATER_MARK);
    }

    #[test]
    fn test_paginate_by_entity_id() {
        let intervals: Vec<EntityInterval> = ["urn:d", "urn:a", "urn:c", "urn:b", "urn:a"]
            .iter()
            .enumerate()
            .map(|(i, id)| EntityInterval::new(*id, at(i as i64), at(i as i64 + 1)))
            .collect();

        let first = paginate(intervals.clone(), None, 2);
        assert_eq!(first.entity_ids(), vec!["urn:a", "urn:b"]);
        assert_eq!(first.intervals.len(), 3);
        assert_eq!(first.next_anchor.as_deref(), Some("urn:c"));
        assert_eq!(first.prev_anchor, None);
        assert_eq!(first.total_entities, Some(4));

        let second = paginate(intervals.clone(), Some("urn:c"), 2);
        assert_eq!(second.entity_ids(), vec!["urn:c", "urn:d"]);
        assert_eq!(second.next_anchor, None);
        assert_eq!(second.prev_anchor.as_deref(), Some("urn:a"));

        let unknown = paginate(intervals, Some("urn:zzz"), 2);
        assert_eq!(unknown.entity_ids(), vec!["urn:a", "urn:b"]);
    }
}
