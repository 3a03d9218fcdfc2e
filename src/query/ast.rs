//! 查询条件语法树

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::collections::BTreeSet;
use std::fmt;

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOperator {
    Equal,
    NotEqual,
    GreaterOrEqual,
    LessOrEqual,
    Pattern,
    NotPattern,
    Greater,
    Less,
}

impl ComparisonOperator {
    /// 多字符运算符排在其前缀之前
    pub const PRECEDENCE: [ComparisonOperator; 8] = [
        ComparisonOperator::Equal,
        ComparisonOperator::NotEqual,
        ComparisonOperator::GreaterOrEqual,
        ComparisonOperator::LessOrEqual,
        ComparisonOperator::Pattern,
        ComparisonOperator::NotPattern,
        ComparisonOperator::Greater,
        ComparisonOperator::Less,
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOperator::Equal => "==",
            ComparisonOperator::NotEqual => "!=",
            ComparisonOperator::GreaterOrEqual => ">=",
            ComparisonOperator::LessOrEqual => "<=",
            ComparisonOperator::Pattern => "~=",
            ComparisonOperator::NotPattern => "!~=",
            ComparisonOperator::Greater => ">",
            ComparisonOperator::Less => "<",
        }
    }

    pub fn is_equality(&self) -> bool {
        matches!(self, ComparisonOperator::Equal | ComparisonOperator::NotEqual)
    }

    pub fn is_pattern(&self) -> bool {
        matches!(
            self,
            ComparisonOperator::Pattern | ComparisonOperator::NotPattern
        )
    }

    pub fn is_negated(&self) -> bool {
        matches!(
            self,
            ComparisonOperator::NotEqual | ComparisonOperator::NotPattern
        )
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// 逻辑连接符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOperator {
    And,
    Or,
}

impl LogicalOperator {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            ';' => Some(LogicalOperator::And),
            '|' => Some(LogicalOperator::Or),
            _ => None,
        }
    }

    pub fn symbol(&self) -> char {
        match self {
            LogicalOperator::And => ';',
            LogicalOperator::Or => '|',
        }
    }
}

/// 字面量
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Text(String),
    Number(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    List(Vec<QueryValue>),
    Range(Box<QueryValue>, Box<QueryValue>),
}

impl QueryValue {
    pub fn kind(&self) -> &'static str {
        match self {
            QueryValue::Text(_) => "text",
            QueryValue::Number(_) => "number",
            QueryValue::Boolean(_) => "boolean",
            QueryValue::DateTime(_) => "date-time",
            QueryValue::Date(_) => "date",
            QueryValue::Time(_) => "time",
            QueryValue::List(_) => "list",
            QueryValue::Range(_, _) => "range",
        }
    }

    /// 列表和区间的元素类型，标量返回自身类型
    pub fn element_kind(&self) -> &'static str {
        match self {
            QueryValue::List(items) => items.first().map(QueryValue::kind).unwrap_or("text"),
            QueryValue::Range(low, _) => low.kind(),
            scalar => scalar.kind(),
        }
    }
}

/// 比较目标：属性值本身、复合值成员或系统字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueTarget {
    Value,
    CompoundKey(Vec<String>),
    ObservedAt,
    CreatedAt,
    ModifiedAt,
    UnitCode,
    DatasetId,
}

impl ValueTarget {
    pub fn system(name: &str) -> Option<Self> {
        match name {
            "observedAt" => Some(ValueTarget::ObservedAt),
            "createdAt" => Some(ValueTarget::CreatedAt),
            "modifiedAt" => Some(ValueTarget::ModifiedAt),
            "unitCode" => Some(ValueTarget::UnitCode),
            "datasetId" => Some(ValueTarget::DatasetId),
            _ => None,
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            ValueTarget::ObservedAt | ValueTarget::CreatedAt | ValueTarget::ModifiedAt
        )
    }
}

/// 比较项：`属性路径 运算符 值`
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonTerm {
    /// 展开后的属性 ID
    pub attribute: String,
    /// 展开后的子属性 ID
    pub sub_attribute: Option<String>,
    pub target: ValueTarget,
    pub operator: ComparisonOperator,
    pub value: QueryValue,
}

/// 逻辑项：子项与连接符交替排列，`connectors.len() == terms.len() - 1`
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalTerm {
    pub terms: Vec<QueryTerm>,
    pub connectors: Vec<LogicalOperator>,
}

impl LogicalTerm {
    /// 按 AND 优先于 OR 分组：返回 OR 连接的各组，每组内为 AND 连接的子项
    pub fn or_groups(&self) -> Vec<Vec<&QueryTerm>> {
        let mut groups = Vec::new();
        let mut current = Vec::new();
        for (index, term) in self.terms.iter().enumerate() {
            current.push(term);
            match self.connectors.get(index) {
                Some(LogicalOperator::Or) | None => groups.push(std::mem::take(&mut current)),
                Some(LogicalOperator::And) => {}
            }
        }
        groups
    }
}

/// 查询条件
#[derive(Debug, Clone, PartialEq)]
pub enum QueryTerm {
    Comparison(ComparisonTerm),
    Logical(LogicalTerm),
}

impl QueryTerm {
    /// 条件中引用的全部属性 ID
    pub fn attributes(&self) -> BTreeSet<String> {
        let mut attributes = BTreeSet::new();
        self.collect_attributes(&mut attributes);
        attributes
    }

    fn collect_attributes(&self, out: &mut BTreeSet<String>) {
        match self {
            QueryTerm::Comparison(term) => {
                out.insert(term.attribute.clone());
            }
            QueryTerm::Logical(logical) => {
                for term in &logical.terms {
                    term.collect_attributes(out);
                }
            }
        }
    }

    /// 叶子数量
    pub fn leaf_count(&self) -> usize {
        match self {
            QueryTerm::Comparison(_) => 1,
            QueryTerm::Logical(logical) => logical.terms.iter().map(QueryTerm::leaf_count).sum(),
        }
    }
}
