//! 查询条件解析器
//!
//! 语法：单个比较 `属性路径<运算符>值`，或用 `;`（AND）、`|`（OR）连接的多个条件，
//! 括号用于分组。连接符只在括号深度为 0 且不在引号内时生效。

use crate::context::ResolvedContext;
use crate::error::{AppError, Result};
use crate::query::ast::{
    ComparisonOperator, ComparisonTerm, LogicalOperator, LogicalTerm, QueryTerm, ValueTarget,
};
use crate::query::literal;

/// 解析 `q` 参数，属性路径在给定上下文下展开
pub struct QueryParser<'a> {
    context: &'a ResolvedContext,
}

impl<'a> QueryParser<'a> {
    pub fn new(context: &'a ResolvedContext) -> Self {
        Self { context }
    }

    pub fn parse(&self, query: &str) -> Result<QueryTerm> {
        let term = self.parse_term(query)?;
        tracing::debug!(query, leaves = term.leaf_count(), "parsed query term");
        Ok(term)
    }

    fn parse_term(&self, raw: &str) -> Result<QueryTerm> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AppError::InvalidQuery("empty query term".to_string()));
        }
        if let Some(inner) = strip_enclosing_parens(raw) {
            return self.parse_term(inner);
        }

        let (pieces, connectors) = split_top_level(raw)?;
        if connectors.is_empty() {
            return self.parse_comparison(raw).map(QueryTerm::Comparison);
        }
        let terms = pieces
            .into_iter()
            .map(|piece| self.parse_term(piece))
            .collect::<Result<Vec<_>>>()?;
        Ok(QueryTerm::Logical(LogicalTerm { terms, connectors }))
    }

    fn parse_comparison(&self, raw: &str) -> Result<ComparisonTerm> {
        let (position, operator) = find_operator(raw).ok_or_else(|| {
            AppError::InvalidQuery(format!("no comparison operator in '{raw}'"))
        })?;
        let path = raw[..position].trim();
        let value_raw = &raw[position + operator.symbol().len()..];

        let (attribute, sub_attribute, target) = self.parse_path(path)?;
        let value = literal::classify(value_raw, &target)?;
        literal::check_compatibility(operator, &value, &target)?;

        Ok(ComparisonTerm {
            attribute,
            sub_attribute,
            target,
            operator,
            value,
        })
    }

    fn parse_path(&self, path: &str) -> Result<(String, Option<String>, ValueTarget)> {
        let invalid = || AppError::InvalidQuery(format!("invalid attribute path '{path}'"));
        if path.is_empty() || path.contains(['(', ')', '"', ' ']) {
            return Err(invalid());
        }

        let (name, brackets) = match path.find('[') {
            Some(index) => (&path[..index], Some(&path[index..])),
            None => (path, None),
        };
        let compound_keys = brackets.map(parse_compound_keys).transpose()?;

        let segments: Vec<&str> = if name.contains("://") {
            vec![name]
        } else {
            name.split('.').collect()
        };
        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid());
        }

        let (attribute, sub_attribute, system) = match segments.as_slice() {
            [attribute] => (*attribute, None, None),
            [attribute, second] => match ValueTarget::system(second) {
                Some(target) => (*attribute, None, Some(target)),
                None => (*attribute, Some(*second), None),
            },
            [attribute, sub, third] => {
                let target = ValueTarget::system(third).ok_or_else(invalid)?;
                (*attribute, Some(*sub), Some(target))
            }
            _ => return Err(invalid()),
        };

        let target = match (system, compound_keys) {
            (Some(_), Some(_)) => return Err(invalid()),
            (Some(target), None) => target,
            (None, Some(keys)) => ValueTarget::CompoundKey(keys),
            (None, None) => ValueTarget::Value,
        };

        let attribute = self.context.expand(attribute)?;
        let sub_attribute = sub_attribute
            .map(|sub| self.context.expand(sub))
            .transpose()?;
        Ok((attribute, sub_attribute, target))
    }
}

/// `(…)` 整体包裹时返回内部内容
fn strip_enclosing_parens(raw: &str) -> Option<&str> {
    if !raw.starts_with('(') || !raw.ends_with(')') {
        return None;
    }
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut escaped = false;
    for (index, c) in raw.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '(' if !in_quotes => depth += 1,
            ')' if !in_quotes => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return (index == raw.len() - 1).then(|| &raw[1..index]);
                }
            }
            _ => {}
        }
    }
    None
}

/// 在顶层切分子项与连接符
fn split_top_level(raw: &str) -> Result<(Vec<&str>, Vec<LogicalOperator>)> {
    let mut pieces = Vec::new();
    let mut connectors = Vec::new();
    let mut depth = 0i32;
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (index, c) in raw.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '(' if !in_quotes => depth += 1,
            ')' if !in_quotes => {
                depth -= 1;
                if depth < 0 {
                    return Err(AppError::InvalidQuery(format!(
                        "unbalanced parenthesis in '{raw}'"
                    )));
                }
            }
            _ if depth == 0 && !in_quotes => {
                if let Some(connector) = LogicalOperator::from_char(c) {
                    pieces.push(&raw[start..index]);
                    connectors.push(connector);
                    start = index + c.len_utf8();
                }
            }
            _ => {}
        }
    }
    if in_quotes {
        return Err(AppError::InvalidQuery(format!(
            "unterminated string in '{raw}'"
        )));
    }
    if depth != 0 {
        return Err(AppError::InvalidQuery(format!(
            "unbalanced parenthesis in '{raw}'"
        )));
    }
    pieces.push(&raw[start..]);
    Ok((pieces, connectors))
}

/// 找到第一个运算符；同一位置有多个候选时取最长的
fn find_operator(raw: &str) -> Option<(usize, ComparisonOperator)> {
    let mut bracket_depth = 0usize;
    for (index, c) in raw.char_indices() {
        match c {
            '[' => bracket_depth += 1,
            ']' => bracket_depth = bracket_depth.saturating_sub(1),
            '"' => return None,
            _ if bracket_depth == 0 => {
                let rest = &raw[index..];
                let best = ComparisonOperator::PRECEDENCE
                    .iter()
                    .filter(|op| rest.starts_with(op.symbol()))
                    .max_by_key(|op| op.symbol().len());
                if let Some(op) = best {
                    return Some((index, *op));
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_compound_keys(brackets: &str) -> Result<Vec<String>> {
    let invalid = || AppError::InvalidQuery(format!("invalid compound path '{brackets}'"));
    let mut keys = Vec::new();
    let mut rest = brackets;
    while !rest.is_empty() {
        let inner_end = rest.find(']').ok_or_else(invalid)?;
        let inner = rest.strip_prefix('[').ok_or_else(invalid)?;
        let key = &inner[..inner_end - 1];
        if key.is_empty() {
            return Err(invalid());
        }
        for part in key.split('.') {
            if part.is_empty() {
                return Err(invalid());
            }
            keys.push(part.to_string());
        }
        rest = &rest[inner_end + 1..];
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextDocument;
    use crate::query::ast::QueryValue;
    use rstest::rstest;
    use serde_json::json;
    use std::sync::Arc;

    fn context() -> ResolvedContext {
        let raw = json!({
            "@context": {
                "@vocab": "https://example.org/vocab/",
                "temperature": "https://example.org/temperature"
            }
        });
        let document = ContextDocument::parse("https://example.org/ctx", &raw).unwrap();
        ResolvedContext::from_documents(&[Arc::new(document)])
    }

    fn comparison(term: &QueryTerm) -> &ComparisonTerm {
        match term {
            QueryTerm::Comparison(c) => c,
            QueryTerm::Logical(_) => panic!("expected a comparison"),
        }
    }

    #[rstest]
    #[case("temperature==20", ComparisonOperator::Equal)]
    #[case("temperature!=20", ComparisonOperator::NotEqual)]
    #[case("temperature>=20", ComparisonOperator::GreaterOrEqual)]
    #[case("temperature<=20", ComparisonOperator::LessOrEqual)]
    #[case("temperature>20", ComparisonOperator::Greater)]
    #[case("temperature<20", ComparisonOperator::Less)]
    #[case("name~=\"^room\"", ComparisonOperator::Pattern)]
    #[case("name!~=\"^room\"", ComparisonOperator::NotPattern)]
    fn test_operators(#[case] query: &str, #[case] operator: ComparisonOperator) {
        let context = context();
        let term = QueryParser::new(&context).parse(query).unwrap();
        assert_eq!(comparison(&term).operator, operator);
    }

    #[test]
    fn test_attribute_is_expanded() {
        let context = context();
        let term = QueryParser::new(&context).parse("temperature>20").unwrap();
        let leaf = comparison(&term);
        assert_eq!(leaf.attribute, "https://example.org/temperature");
        assert_eq!(leaf.value, QueryValue::Number(20.0));
        assert_eq!(leaf.target, ValueTarget::Value);
    }

    #[test]
    fn test_logical_split_and_grouping() {
        let context = context();
        let term = QueryParser::new(&context)
            .parse("temperature>20|radio==false")
            .unwrap();
        let QueryTerm::Logical(logical) = term else {
            panic!("expected logical term");
        };
        assert_eq!(logical.connectors, vec![LogicalOperator::Or]);
        assert_eq!(logical.terms.len(), 2);
        assert_eq!(
            comparison(&logical.terms[1]).attribute,
            "https://example.org/vocab/radio"
        );

        let nested = QueryParser::new(&context)
            .parse("(a==1;b==2)|c==3")
            .unwrap();
        let QueryTerm::Logical(nested) = nested else {
            panic!("expected logical term");
        };
        assert!(matches!(nested.terms[0], QueryTerm::Logical(_)));
        assert_eq!(nested.connectors, vec![LogicalOperator::Or]);
    }

    #[test]
    fn test_connectors_inside_quotes_are_literal() {
        let context = context();
        let term = QueryParser::new(&context)
            .parse("name==\"a;b|c\"")
            .unwrap();
        assert_eq!(
            comparison(&term).value,
            QueryValue::Text("a;b|c".into())
        );
    }

    #[test]
    fn test_paths() {
        let context = context();
        let parser = QueryParser::new(&context);

        let sub = parser.parse("temperature.accuracy<0.5").unwrap();
        assert_eq!(
            comparison(&sub).sub_attribute.as_deref(),
            Some("https://example.org/vocab/accuracy")
        );

        let system = parser
            .parse("temperature.observedAt>=2024-01-01T00:00:00Z")
            .unwrap();
        assert_eq!(comparison(&system).target, ValueTarget::ObservedAt);

        let compound = parser.parse("address[city.name]==\"Paris\"").unwrap();
        assert_eq!(
            comparison(&compound).target,
            ValueTarget::CompoundKey(vec!["city".into(), "name".into()])
        );

        let chained = parser.parse("address[city][zip]==75001").unwrap();
        assert_eq!(
            comparison(&chained).target,
            ValueTarget::CompoundKey(vec!["city".into(), "zip".into()])
        );
    }

    #[rstest]
    #[case("temperature")]
    #[case("temperature==")]
    #[case("(temperature==20")]
    #[case("temperature==20)")]
    #[case("temperature==20;")]
    #[case("name==\"open")]
    #[case("temperature>open")]
    #[case("a.b.c.d==1")]
    #[case("address[]==1")]
    #[case("temperature~=20")]
    fn test_invalid_queries(#[case] query: &str) {
        let context = context();
        assert!(matches!(
            QueryParser::new(&context).parse(query),
            Err(AppError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_unexpandable_attribute() {
        let context = ResolvedContext::default();
        assert!(matches!(
            QueryParser::new(&context).parse("temperature==1"),
            Err(AppError::AttributeExpansionFailure(_))
        ));
    }
}
