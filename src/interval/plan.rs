//! 区间计划
//!
//! 查询条件按 AND 优先于 OR 分组后得到的组合树；查询条件与地理谓词同时存在时在顶层以 AND 组合。

use std::collections::BTreeSet;

use crate::error::Result;
use crate::interval::EntityInterval;
use crate::interval::algebra;
use crate::query::ast::{ComparisonTerm, QueryTerm};
use crate::query::geo::GeoQuery;

/// 计划叶子
#[derive(Debug, Clone, Copy)]
pub enum PlanLeaf<'a> {
    Comparison(&'a ComparisonTerm),
    Geo(&'a GeoQuery),
}

impl PlanLeaf<'_> {
    /// 叶子时间线所依据的属性
    pub fn attribute(&self) -> &str {
        match self {
            PlanLeaf::Comparison(term) => &term.attribute,
            PlanLeaf::Geo(geo) => &geo.geoproperty,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IntervalPlan {
    Comparison(ComparisonTerm),
    Geo(GeoQuery),
    And(Vec<IntervalPlan>),
    Or(Vec<IntervalPlan>),
}

impl IntervalPlan {
    /// 没有任何谓词时返回 None
    pub fn build(query: Option<&QueryTerm>, geo: Option<&GeoQuery>) -> Option<Self> {
        let query = query.map(Self::from_term);
        let geo = geo.cloned().map(IntervalPlan::Geo);
        match (query, geo) {
            (Some(query), Some(geo)) => Some(IntervalPlan::And(vec![query, geo])),
            (query, geo) => query.or(geo),
        }
    }

    fn from_term(term: &QueryTerm) -> Self {
        match term {
            QueryTerm::Comparison(comparison) => IntervalPlan::Comparison(comparison.clone()),
            QueryTerm::Logical(logical) => {
                let mut groups: Vec<IntervalPlan> = logical
                    .or_groups()
                    .into_iter()
                    .map(|group| {
                        let mut members: Vec<IntervalPlan> =
                            group.into_iter().map(Self::from_term).collect();
                        if members.len() == 1 {
                            members.remove(0)
                        } else {
                            IntervalPlan::And(members)
                        }
                    })
                    .collect();
                if groups.len() == 1 {
                    groups.remove(0)
                } else {
                    IntervalPlan::Or(groups)
                }
            }
        }
    }

    /// 计划涉及的全部属性
    pub fn attributes(&self) -> BTreeSet<String> {
        let mut attributes = BTreeSet::new();
        self.visit_leaves(&mut |leaf| {
            attributes.insert(leaf.attribute().to_string());
        });
        attributes
    }

    pub fn visit_leaves<'a>(&'a self, visit: &mut dyn FnMut(PlanLeaf<'a>)) {
        match self {
            IntervalPlan::Comparison(term) => visit(PlanLeaf::Comparison(term)),
            IntervalPlan::Geo(geo) => visit(PlanLeaf::Geo(geo)),
            IntervalPlan::And(children) | IntervalPlan::Or(children) => {
                for child in children {
                    child.visit_leaves(visit);
                }
            }
        }
    }

    /// 以给定的叶子求值函数计算整棵计划的区间
    pub fn evaluate<F>(&self, leaf: &mut F) -> Result<Vec<EntityInterval>>
    where
        F: FnMut(PlanLeaf<'_>) -> Result<Vec<EntityInterval>>,
    {
        match self {
            IntervalPlan::Comparison(term) => leaf(PlanLeaf::Comparison(term)),
            IntervalPlan::Geo(geo) => leaf(PlanLeaf::Geo(geo)),
            IntervalPlan::And(children) => {
                let mut children = children.iter();
                let mut acc = match children.next() {
                    Some(first) => first.evaluate(leaf)?,
                    None => return Ok(Vec::new()),
                };
                for child in children {
                    if acc.is_empty() {
                        break;
                    }
                    acc = algebra::intersect(&acc, &child.evaluate(leaf)?);
                }
                Ok(acc)
            }
            IntervalPlan::Or(children) => {
                let mut acc = Vec::new();
                for child in children {
                    acc = algebra::union(&acc, &child.evaluate(leaf)?);
                }
                Ok(acc)
            }
        }
    }
}
