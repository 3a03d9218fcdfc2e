//! 字面量分类与运算符兼容性检查

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

use crate::error::{AppError, Result};
use crate::query::ast::{ComparisonOperator, QueryValue, ValueTarget};

static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").expect("valid regex")
});
static TIME_OF_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{2}:\d{2}:\d{2}(\.\d{1,9})?Z?$").expect("valid regex")
});
static DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid regex"));

/// 按目标与字面量形态分类
pub fn classify(raw: &str, target: &ValueTarget) -> Result<QueryValue> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::InvalidQuery("missing value in query term".to_string()));
    }
    match target {
        ValueTarget::ObservedAt | ValueTarget::CreatedAt | ValueTarget::ModifiedAt => {
            classify_with(raw, &|part| parse_datetime(part).map(QueryValue::DateTime))
        }
        ValueTarget::UnitCode | ValueTarget::DatasetId => classify_with(raw, &|part| {
            if is_quoted(part) {
                unquote(part).map(QueryValue::Text)
            } else {
                Some(QueryValue::Text(part.to_string()))
            }
        }),
        ValueTarget::Value | ValueTarget::CompoundKey(_) => classify_with(raw, &classify_scalar),
    }
}

fn classify_with(raw: &str, scalar: &dyn Fn(&str) -> Option<QueryValue>) -> Result<QueryValue> {
    let unrecognized = || AppError::InvalidQuery(format!("unrecognized value '{raw}'"));

    if raw.starts_with('[') && raw.ends_with(']') && raw.len() >= 2 {
        let inner = &raw[1..raw.len() - 1];
        let items = split_outside_quotes(inner, ",")
            .into_iter()
            .map(|item| scalar(item.trim()).ok_or_else(unrecognized))
            .collect::<Result<Vec<_>>>()?;
        if items.is_empty() {
            return Err(unrecognized());
        }
        let kind = items[0].kind();
        if items.iter().any(|item| item.kind() != kind) {
            return Err(AppError::InvalidQuery(format!(
                "list '{raw}' mixes value types"
            )));
        }
        return Ok(QueryValue::List(items));
    }

    let parts = split_outside_quotes(raw, "..");
    if parts.len() == 2 {
        let low = scalar(parts[0].trim()).ok_or_else(unrecognized)?;
        let high = scalar(parts[1].trim()).ok_or_else(unrecognized)?;
        if low.kind() != high.kind() || matches!(low, QueryValue::Boolean(_)) {
            return Err(AppError::InvalidQuery(format!("invalid range '{raw}'")));
        }
        return Ok(QueryValue::Range(Box::new(low), Box::new(high)));
    }
    if parts.len() > 2 {
        return Err(unrecognized());
    }

    scalar(raw).ok_or_else(unrecognized)
}

fn classify_scalar(raw: &str) -> Option<QueryValue> {
    if is_quoted(raw) {
        return unquote(raw).map(QueryValue::Text);
    }
    if NUMBER.is_match(raw) {
        return raw.parse::<f64>().ok().map(QueryValue::Number);
    }
    if TIME_OF_DAY.is_match(raw) {
        return NaiveTime::parse_from_str(raw.trim_end_matches('Z'), "%H:%M:%S%.f")
            .ok()
            .map(QueryValue::Time);
    }
    if DATE.is_match(raw) {
        return NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .map(QueryValue::Date);
    }
    if let Some(datetime) = parse_datetime(raw) {
        return Some(QueryValue::DateTime(datetime));
    }
    match raw {
        "true" => Some(QueryValue::Boolean(true)),
        "false" => Some(QueryValue::Boolean(false)),
        _ => None,
    }
}

fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// 校验运算符与字面量的组合
pub fn check_compatibility(
    operator: ComparisonOperator,
    value: &QueryValue,
    target: &ValueTarget,
) -> Result<()> {
    let reject = |reason: &str| {
        Err(AppError::InvalidQuery(format!(
            "operator {operator} {reason} ({} value)",
            value.kind()
        )))
    };

    if operator.is_pattern() {
        let QueryValue::Text(pattern) = value else {
            return reject("requires a quoted string");
        };
        if let Err(e) = Regex::new(pattern) {
            return Err(AppError::InvalidQuery(format!(
                "invalid pattern '{pattern}': {e}"
            )));
        }
    }
    match value {
        QueryValue::List(_) | QueryValue::Range(_, _) | QueryValue::Boolean(_)
            if !operator.is_equality() =>
        {
            return reject("only supports == and !=");
        }
        _ => {}
    }
    if matches!(target, ValueTarget::UnitCode | ValueTarget::DatasetId)
        && value.element_kind() != "text"
    {
        return reject("requires a text value for this field");
    }
    if matches!(target, ValueTarget::CompoundKey(_))
        && !matches!(value.element_kind(), "text" | "number" | "boolean")
    {
        return reject("is not supported on compound members");
    }
    Ok(())
}

pub fn is_quoted(raw: &str) -> bool {
    raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"')
}

/// 去掉引号并处理 `\"` 与 `\\` 转义
pub fn unquote(raw: &str) -> Option<String> {
    let inner = raw.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push(chars.next()?),
            '"' => return None,
            other => out.push(other),
        }
    }
    Some(out)
}

/// 在引号之外按分隔符切分
pub fn split_outside_quotes<'a>(raw: &'a str, separator: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;
    let mut index = 0;
    let bytes = raw.as_bytes();
    while index < bytes.len() {
        let b = bytes[index];
        if escaped {
            escaped = false;
        } else if b == b'\\' && in_quotes {
            escaped = true;
        } else if b == b'"' {
            in_quotes = !in_quotes;
        } else if !in_quotes && raw[index..].starts_with(separator) {
            parts.push(&raw[start..index]);
            index += separator.len();
            start = index;
            continue;
        }
        index += 1;
    }
    parts.push(&raw[start..]);
    parts
}
