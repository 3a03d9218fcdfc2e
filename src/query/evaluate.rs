//! 比较项在内存中的求值
//!
//! 语义与下推到存储的谓词一致：类型不匹配或值缺失时结果为 false。

use chrono::{DateTime, Utc};
use regex::Regex;
use std::cmp::Ordering;

use crate::models::attribute::{AttributeInstance, AttributeValue, OperationMode, SubAttributeInstance};
use crate::query::ast::{ComparisonOperator, ComparisonTerm, QueryValue, ValueTarget};

enum Operand<'a> {
    Value(&'a AttributeValue),
    Json(&'a serde_json::Value),
    Time(DateTime<Utc>),
    Text(&'a str),
}

/// 对一条属性实例求值
///
/// `sub_attributes` 为该实例的子属性实例，`created_at` 为解析出的实例创建时间。
pub fn evaluate(
    term: &ComparisonTerm,
    instance: &AttributeInstance,
    sub_attributes: &[SubAttributeInstance],
    created_at: Option<DateTime<Utc>>,
) -> bool {
    if instance.operation_mode == OperationMode::Delete {
        return false;
    }

    match &term.sub_attribute {
        Some(sub_id) => sub_attributes
            .iter()
            .filter(|s| s.parent_instance_id == instance.instance_id && &s.attribute_id == sub_id)
            .any(|s| {
                let operand = match &term.target {
                    ValueTarget::Value => s.value.as_ref().map(Operand::Value),
                    ValueTarget::CompoundKey(keys) => compound_member(s.value.as_ref(), keys),
                    ValueTarget::ObservedAt => s.observed_at.map(Operand::Time),
                    ValueTarget::CreatedAt | ValueTarget::ModifiedAt => Some(Operand::Time(s.ts)),
                    ValueTarget::UnitCode => s.unit_code.as_deref().map(Operand::Text),
                    ValueTarget::DatasetId => s.dataset_id.as_deref().map(Operand::Text),
                };
                operand.is_some_and(|o| compare(&o, term.operator, &term.value))
            }),
        None => {
            let operand = match &term.target {
                ValueTarget::Value => instance.value.as_ref().map(Operand::Value),
                ValueTarget::CompoundKey(keys) => compound_member(instance.value.as_ref(), keys),
                ValueTarget::ObservedAt => instance.observed_at.map(Operand::Time),
                ValueTarget::CreatedAt => created_at.map(Operand::Time),
                ValueTarget::ModifiedAt => Some(Operand::Time(instance.ts)),
                ValueTarget::UnitCode => instance.unit_code.as_deref().map(Operand::Text),
                ValueTarget::DatasetId => instance.dataset_id.as_deref().map(Operand::Text),
            };
            operand.is_some_and(|o| compare(&o, term.operator, &term.value))
        }
    }
}

fn compound_member<'a>(value: Option<&'a AttributeValue>, keys: &[String]) -> Option<Operand<'a>> {
    let Some(AttributeValue::Compound(json)) = value else {
        return None;
    };
    keys.iter()
        .try_fold(json, |current, key| current.get(key.as_str()))
        .map(Operand::Json)
}

fn compare(operand: &Operand<'_>, operator: ComparisonOperator, expected: &QueryValue) -> bool {
    match expected {
        QueryValue::List(items) => {
            let orderings: Vec<Option<Ordering>> =
                items.iter().map(|item| order(operand, item)).collect();
            if orderings.iter().all(Option::is_none) {
                return false;
            }
            let found = orderings.contains(&Some(Ordering::Equal));
            if operator.is_negated() { !found } else { found }
        }
        QueryValue::Range(low, high) => {
            let (Some(lower), Some(upper)) = (order(operand, low), order(operand, high)) else {
                return false;
            };
            let inside = lower != Ordering::Less && upper != Ordering::Greater;
            if operator.is_negated() { !inside } else { inside }
        }
        QueryValue::Text(pattern) if operator.is_pattern() => {
            let Some(text) = operand_text(operand) else {
                return false;
            };
            let Ok(regex) = Regex::new(pattern) else {
                return false;
            };
            let matched = regex.is_match(text);
            if operator.is_negated() { !matched } else { matched }
        }
        scalar => {
            let Some(ordering) = order(operand, scalar) else {
                return false;
            };
            match operator {
                ComparisonOperator::Equal => ordering == Ordering::Equal,
                ComparisonOperator::NotEqual => ordering != Ordering::Equal,
                ComparisonOperator::Greater => ordering == Ordering::Greater,
                ComparisonOperator::GreaterOrEqual => ordering != Ordering::Less,
                ComparisonOperator::Less => ordering == Ordering::Less,
                ComparisonOperator::LessOrEqual => ordering != Ordering::Greater,
                ComparisonOperator::Pattern | ComparisonOperator::NotPattern => false,
            }
        }
    }
}

fn operand_text<'a>(operand: &Operand<'a>) -> Option<&'a str> {
    match operand {
        Operand::Value(AttributeValue::String(s)) => Some(s),
        Operand::Value(AttributeValue::Relationship(s)) => Some(s),
        Operand::Json(serde_json::Value::String(s)) => Some(s),
        Operand::Text(s) => Some(s),
        _ => None,
    }
}

/// 操作数与标量字面量的顺序，类型不兼容时为 None
fn order(operand: &Operand<'_>, expected: &QueryValue) -> Option<Ordering> {
    match (operand, expected) {
        (Operand::Value(AttributeValue::Number(n)), QueryValue::Number(e)) => n.partial_cmp(e),
        (Operand::Value(AttributeValue::Boolean(b)), QueryValue::Boolean(e)) => Some(b.cmp(e)),
        (Operand::Value(AttributeValue::DateTime(t)), expected) => order_time(*t, expected),
        (Operand::Time(t), expected) => order_time(*t, expected),
        (Operand::Json(serde_json::Value::Number(n)), QueryValue::Number(e)) => {
            n.as_f64().and_then(|n| n.partial_cmp(e))
        }
        (Operand::Json(serde_json::Value::Bool(b)), QueryValue::Boolean(e)) => Some(b.cmp(e)),
        (operand, QueryValue::Text(e)) => operand_text(operand).map(|s| s.cmp(e.as_str())),
        _ => None,
    }
}

fn order_time(t: DateTime<Utc>, expected: &QueryValue) -> Option<Ordering> {
    match expected {
        QueryValue::DateTime(e) => Some(t.cmp(e)),
        QueryValue::Date(d) => Some(t.date_naive().cmp(d)),
        QueryValue::Time(e) => Some(t.time().cmp(e)),
        _ => None,
    }
}
