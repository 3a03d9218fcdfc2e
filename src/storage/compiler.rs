//! 区间计划到 SQL 的编译
//!
//! 每个计划节点编译为一个 CTE，产出 `(entity_id, start_time, end_time)`：
//! 候选实体、叶子时间线、游程折叠、AND/OR 组合，最后是 `intervals` 与分页用的 `ids`/`anchor`。

use sea_orm::Statement;

use crate::interval::IntervalPlan;
use crate::models::attribute::GeometryKind;
use crate::query::ast::{ComparisonOperator, ComparisonTerm, QueryValue, ValueTarget};
use crate::query::geo::{GeoQuery, GeoRelation};
use crate::query::time::{TimeProperty, TimeQuery, TimeRelation};
use crate::storage::repository::{InstanceQuery, IntervalQuery, SortOrder};
use crate::storage::sql::SqlBuilder;

pub const INSTANCE_TABLE: &str = "attribute_instance";
pub const SUB_INSTANCE_TABLE: &str = "sub_attribute_instance";
pub const ENTITY_TABLE: &str = "entity_record";

const VALUE_COLUMNS: &str = "value_text, value_number, value_boolean, value_datetime, \
     value_compound, value_relationship, \
     ST_AsGeoJSON(COALESCE(geo_point, geo_linestring, geo_polygon, geo_multilinestring, geo_multipolygon)) AS geo_json";

/// 区间查询编译出的语句
#[derive(Debug)]
pub struct CompiledIntervalQuery {
    pub intervals: Statement,
    pub next_anchor: Option<Statement>,
    pub prev_anchor: Option<Statement>,
    pub count: Option<Statement>,
}

pub fn compile_interval_query(query: &IntervalQuery) -> CompiledIntervalQuery {
    let intervals = {
        let mut b = prefix(query);
        match &query.page {
            Some(page) => {
                b.push(
                    " SELECT i.entity_id, i.start_time, i.end_time FROM intervals i \
                     JOIN ids ON ids.entity_id = i.entity_id CROSS JOIN anchor \
                     WHERE ids.rn >= anchor.rn AND ids.rn < anchor.rn + ",
                )
                .push_bind(page.size as i64)
                .push(" ORDER BY i.entity_id, i.start_time");
            }
            None => {
                b.push(
                    " SELECT entity_id, start_time, end_time FROM intervals \
                     ORDER BY entity_id, start_time",
                );
            }
        }
        tracing::debug!(sql = b.sql(), params = b.values().len(), "compiled interval query");
        b.build()
    };

    let Some(page) = &query.page else {
        return CompiledIntervalQuery {
            intervals,
            next_anchor: None,
            prev_anchor: None,
            count: None,
        };
    };

    let next_anchor = {
        let mut b = prefix(query);
        b.push(" SELECT ids.entity_id FROM ids CROSS JOIN anchor WHERE ids.rn = anchor.rn + ")
            .push_bind(page.size as i64);
        b.build()
    };
    let prev_anchor = {
        let mut b = prefix(query);
        b.push(
            " SELECT ids.entity_id FROM ids CROSS JOIN anchor \
             WHERE anchor.rn > 1 AND ids.rn = greatest(anchor.rn - ",
        )
        .push_bind(page.size as i64)
        .push(", 1)");
        b.build()
    };
    let count = page.count.then(|| {
        let mut b = prefix(query);
        b.push(" SELECT count(*) AS total FROM ids");
        b.build()
    });

    CompiledIntervalQuery {
        intervals,
        next_anchor: Some(next_anchor),
        prev_anchor: Some(prev_anchor),
        count,
    }
}

/// `WITH candidates …, intervals … [, ids …, anchor …]`
fn prefix(query: &IntervalQuery) -> SqlBuilder {
    let mut writer = CteWriter::new(&query.time);
    writer.candidates(query);

    let root = query.plan.as_ref().map(|plan| writer.node(plan));
    writer.open("intervals");
    match root {
        Some(root) => {
            writer
                .b
                .push("SELECT entity_id, start_time, end_time FROM ")
                .push(&root);
        }
        None => {
            let window = query.time.window();
            writer
                .b
                .push("SELECT entity_id, ")
                .push_bind(window.start)
                .push("::timestamptz AS start_time, ")
                .push_bind(window.end)
                .push("::timestamptz AS end_time FROM candidates");
        }
    }
    writer.close();

    if let Some(page) = &query.page {
        writer.open("ids");
        writer.b.push(
            "SELECT entity_id, row_number() OVER (ORDER BY entity_id) AS rn \
             FROM (SELECT DISTINCT entity_id FROM intervals) d",
        );
        writer.close();
        writer.open("anchor");
        writer
            .b
            .push("SELECT COALESCE((SELECT rn FROM ids WHERE entity_id = ")
            .push_bind(page.anchor.clone())
            .push("), 1) AS rn");
        writer.close();
    }
    writer.b
}

struct CteWriter<'a> {
    b: SqlBuilder,
    time: &'a TimeQuery,
    ctes: usize,
    nodes: usize,
}

impl<'a> CteWriter<'a> {
    fn new(time: &'a TimeQuery) -> Self {
        Self {
            b: SqlBuilder::new(),
            time,
            ctes: 0,
            nodes: 0,
        }
    }

    fn open(&mut self, name: &str) {
        self.b.push(if self.ctes == 0 { "WITH " } else { ", " });
        self.b.push(name).push(" AS (");
        self.ctes += 1;
    }

    fn close(&mut self) {
        self.b.push(")");
    }

    fn next_name(&mut self) -> String {
        let name = format!("n{}", self.nodes);
        self.nodes += 1;
        name
    }

    fn candidates(&mut self, query: &IntervalQuery) {
        self.open("candidates");
        self.b.push(&format!(
            "SELECT latest.entity_id FROM (\
             SELECT DISTINCT ON (er.entity_id) er.entity_id, er.entity_type, er.operation_mode \
             FROM {ENTITY_TABLE} er ORDER BY er.entity_id, er.ts DESC) latest \
             WHERE latest.operation_mode <> 'Delete'"
        ));
        let filter = &query.filter;
        if !filter.types.is_empty() {
            self.b
                .push(" AND latest.entity_type IN (")
                .push_bind_list(filter.types.iter().cloned())
                .push(")");
        }
        if !filter.ids.is_empty() {
            self.b
                .push(" AND latest.entity_id IN (")
                .push_bind_list(filter.ids.iter().cloned())
                .push(")");
        }
        if let Some(pattern) = &filter.id_pattern {
            self.b
                .push(" AND latest.entity_id ~ ")
                .push_bind(pattern.clone());
        }
        self.close();
    }

    /// 编译一个计划节点，返回其 CTE 名
    fn node(&mut self, plan: &IntervalPlan) -> String {
        match plan {
            IntervalPlan::Comparison(term) => {
                self.leaf(&term.attribute, &mut |b| push_comparison(b, term, "ai"))
            }
            IntervalPlan::Geo(geo) => self.leaf(&geo.geoproperty, &mut |b| push_geo(b, geo, "ai")),
            IntervalPlan::And(children) => self.combine(children, Self::and),
            IntervalPlan::Or(children) => self.combine(children, Self::or),
        }
    }

    fn combine(
        &mut self,
        children: &[IntervalPlan],
        join: fn(&mut Self, &str, &str) -> String,
    ) -> String {
        let mut names = children.iter().map(|child| self.node(child)).collect::<Vec<_>>();
        if names.is_empty() {
            let name = self.next_name();
            self.open(&name);
            self.b.push(
                "SELECT entity_id, now() AS start_time, now() AS end_time FROM candidates WHERE false",
            );
            self.close();
            return name;
        }
        let mut acc = names.remove(0);
        for name in names {
            acc = join(self, &acc, &name);
        }
        acc
    }

    fn and(&mut self, left: &str, right: &str) -> String {
        let name = self.next_name();
        self.open(&name);
        self.b.push(&format!(
            "SELECT a.entity_id, greatest(a.start_time, b.start_time) AS start_time, \
             least(a.end_time, b.end_time) AS end_time \
             FROM {left} a JOIN {right} b ON a.entity_id = b.entity_id \
             AND a.start_time <= b.end_time AND b.start_time <= a.end_time"
        ));
        self.close();
        name
    }

    fn or(&mut self, left: &str, right: &str) -> String {
        let name = self.next_name();
        let overlap = "a.entity_id = b.entity_id AND a.start_time <= b.end_time AND b.start_time <= a.end_time";
        self.open(&name);
        self.b.push(&format!(
            "SELECT a.entity_id, least(a.start_time, b.start_time) AS start_time, \
             greatest(a.end_time, b.end_time) AS end_time \
             FROM {left} a JOIN {right} b ON {overlap} \
             UNION SELECT a.entity_id, a.start_time, a.end_time FROM {left} a \
             WHERE NOT EXISTS (SELECT 1 FROM {right} b WHERE {overlap}) \
             UNION SELECT b.entity_id, b.start_time, b.end_time FROM {right} b \
             WHERE NOT EXISTS (SELECT 1 FROM {left} a WHERE {overlap})"
        ));
        self.close();
        name
    }

    /// 叶子：原始时间线、边界补齐、游程折叠
    fn leaf(&mut self, attribute: &str, predicate: &mut dyn FnMut(&mut SqlBuilder)) -> String {
        let name = self.next_name();
        let raw = format!("{name}_raw");
        let column = time_column("ai", self.time.property());
        let synthesize = self.time.requires_boundary_synthesis();

        self.open(&raw);
        self.b
            .push(&format!("SELECT ai.entity_id, {column} AS t, "))
            .push("CASE WHEN ai.operation_mode = 'Delete' THEN false ELSE COALESCE((");
        predicate(&mut self.b);
        self.b
            .push(&format!(
                "), false) END AS result FROM {INSTANCE_TABLE} ai \
                 JOIN candidates c ON c.entity_id = ai.entity_id WHERE ai.attribute_id = "
            ))
            .push_bind(attribute.to_string());
        if self.time.property() == TimeProperty::CreatedAt {
            self.b.push(" AND ai.operation_mode = 'Create'");
        }
        self.b.push(" AND ");
        if synthesize {
            self.b.push(&column).push(" IS NOT NULL");
        } else {
            push_time_predicate(&mut self.b, &column, self.time);
        }
        self.close();

        let timeline = if synthesize {
            let window = self.time.window();
            let start_rows = format!("{name}_s");
            self.open(&start_rows);
            self.b
                .push("SELECT DISTINCT ON (r.entity_id) r.entity_id, ")
                .push_bind(window.start)
                .push(&format!(
                    "::timestamptz AS t, r.result FROM {raw} r WHERE r.t <= "
                ))
                .push_bind(window.start)
                .push("::timestamptz AND NOT (");
            push_time_predicate(&mut self.b, "r.t", self.time);
            self.b.push(") ORDER BY r.entity_id, r.t DESC");
            self.close();

            let timeline = format!("{name}_t");
            self.open(&timeline);
            self.b.push(&format!(
                "SELECT entity_id, t, result FROM (SELECT entity_id, t, result, 0 AS o FROM {raw} WHERE "
            ));
            push_time_predicate(&mut self.b, "t", self.time);
            self.b
                .push(&format!(
                    " UNION ALL SELECT entity_id, t, result, 1 AS o FROM {start_rows}) w"
                ))
                .push(" UNION ALL (SELECT DISTINCT ON (w.entity_id) w.entity_id, ")
                .push_bind(window.end)
                .push(&format!(
                    "::timestamptz AS t, w.result FROM (SELECT entity_id, t, result, 0 AS o FROM {raw} WHERE "
                ));
            push_time_predicate(&mut self.b, "t", self.time);
            self.b.push(&format!(
                " UNION ALL SELECT entity_id, t, result, 1 AS o FROM {start_rows}) w \
                 ORDER BY w.entity_id, w.t DESC, w.o)"
            ));
            self.close();
            timeline
        } else {
            raw
        };

        self.open(&name);
        self.b.push(&format!(
            "SELECT entity_id, min(t) AS start_time, max(t) AS end_time FROM (\
             SELECT entity_id, t, result, \
             row_number() OVER (PARTITION BY entity_id ORDER BY t, result) \
             - row_number() OVER (PARTITION BY entity_id, result ORDER BY t) AS grp \
             FROM {timeline}) ranked WHERE result GROUP BY entity_id, result, grp"
        ));
        self.close();
        name
    }
}

/// 时间属性对应的列
pub fn time_column(alias: &str, property: TimeProperty) -> String {
    match property {
        TimeProperty::ObservedAt => format!("{alias}.observed_at"),
        TimeProperty::CreatedAt | TimeProperty::ModifiedAt => format!("{alias}.ts"),
    }
}

/// 时间谓词片段；无边界时只要求列非空
pub fn push_time_predicate(b: &mut SqlBuilder, column: &str, time: &TimeQuery) {
    let (lower, upper) = if time.inclusive() {
        (" >= ", " <= ")
    } else {
        (" > ", " < ")
    };
    match (time.relation(), time.time(), time.end_time()) {
        (Some(TimeRelation::Before), Some(t), _) => {
            b.push(column).push(upper).push_bind(t);
        }
        (Some(TimeRelation::After), Some(t), _) => {
            b.push(column).push(lower).push_bind(t);
        }
        (Some(TimeRelation::Between), Some(start), Some(end)) => {
            b.push(column)
                .push(lower)
                .push_bind(start)
                .push(" AND ")
                .push(column)
                .push(upper)
                .push_bind(end);
        }
        _ => {
            b.push(column).push(" IS NOT NULL");
        }
    }
}

/// 比较项谓词
pub fn push_comparison(b: &mut SqlBuilder, term: &ComparisonTerm, alias: &str) {
    match &term.sub_attribute {
        Some(sub_attribute) => {
            b.push(&format!(
                "EXISTS (SELECT 1 FROM {SUB_INSTANCE_TABLE} s \
                 WHERE s.parent_instance_id = {alias}.instance_id AND s.attribute_id = "
            ))
            .push_bind(sub_attribute.clone())
            .push(" AND ");
            push_operand_comparison(b, term, "s", true);
            b.push(")");
        }
        None => push_operand_comparison(b, term, alias, false),
    }
}

fn push_operand_comparison(b: &mut SqlBuilder, term: &ComparisonTerm, alias: &str, is_sub: bool) {
    let kind = term.value.element_kind();
    let mut operand = SqlBuilder::new();
    match &term.target {
        ValueTarget::Value => {
            operand.push(&value_column(alias, kind));
        }
        ValueTarget::CompoundKey(keys) => {
            push_compound_member(&mut operand, alias, keys, kind);
        }
        ValueTarget::ObservedAt => {
            operand.push(&temporal_operand(&format!("{alias}.observed_at"), kind));
        }
        ValueTarget::ModifiedAt => {
            operand.push(&temporal_operand(&format!("{alias}.ts"), kind));
        }
        ValueTarget::CreatedAt if is_sub => {
            operand.push(&temporal_operand(&format!("{alias}.ts"), kind));
        }
        ValueTarget::CreatedAt => {
            let created = format!(
                "(SELECT max(cr.ts) FROM {INSTANCE_TABLE} cr WHERE cr.entity_id = {alias}.entity_id \
                 AND cr.attribute_id = {alias}.attribute_id AND cr.operation_mode = 'Create' \
                 AND cr.ts <= {alias}.ts)"
            );
            operand.push(&temporal_operand(&created, kind));
        }
        ValueTarget::UnitCode => {
            operand.push(&format!("{alias}.unit_code"));
        }
        ValueTarget::DatasetId => {
            operand.push(&format!("{alias}.dataset_id"));
        }
    }

    // 操作数片段可能带参数，合并时需要重新编号
    let push_operand = |b: &mut SqlBuilder| {
        splice(b, &operand);
    };

    match (&term.value, term.operator) {
        (QueryValue::Text(pattern), operator) if operator.is_pattern() => {
            push_operand(b);
            b.push(if operator.is_negated() { " !~ " } else { " ~ " })
                .push_bind(pattern.clone());
        }
        (QueryValue::List(items), operator) => {
            push_operand(b);
            b.push(if operator.is_negated() { " NOT IN (" } else { " IN (" });
            b.push_separated(items, ", ", push_literal);
            b.push(")");
        }
        (QueryValue::Range(low, high), operator) => {
            push_operand(b);
            b.push(if operator.is_negated() {
                " NOT BETWEEN "
            } else {
                " BETWEEN "
            });
            push_literal(b, low);
            b.push(" AND ");
            push_literal(b, high);
        }
        (scalar, operator) => {
            push_operand(b);
            b.push(match operator {
                ComparisonOperator::Equal => " = ",
                ComparisonOperator::NotEqual => " <> ",
                ComparisonOperator::Greater => " > ",
                ComparisonOperator::GreaterOrEqual => " >= ",
                ComparisonOperator::Less => " < ",
                ComparisonOperator::LessOrEqual => " <= ",
                ComparisonOperator::Pattern => " ~ ",
                ComparisonOperator::NotPattern => " !~ ",
            });
            push_literal(b, scalar);
        }
    }
}

/// 把另一个构造器的片段接到当前构造器，占位符重新编号
fn splice(b: &mut SqlBuilder, fragment: &SqlBuilder) {
    let sql = fragment.sql();
    let values = fragment.values();
    let mut rest = sql;
    while let Some(index) = rest.find('$') {
        b.push(&rest[..index]);
        let digits: String = rest[index + 1..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        match digits
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|n| values.get(n)) {
            Some(value) => {
                b.push_bind(value.clone());
                rest = &rest[index + 1 + digits.len()..];
            }
            None => {
                b.push("$");
                rest = &rest[index + 1..];
            }
        }
    }
    b.push(rest);
}

fn value_column(alias: &str, kind: &str) -> String {
    match kind {
        "number" => format!("{alias}.value_number"),
        "boolean" => format!("{alias}.value_boolean"),
        "date-time" => format!("{alias}.value_datetime"),
        "date" | "time" => temporal_operand(&format!("{alias}.value_datetime"), kind),
        _ => format!("COALESCE({alias}.value_text, {alias}.value_relationship)"),
    }
}

fn temporal_operand(expr: &str, kind: &str) -> String {
    match kind {
        "date" => format!("({expr} AT TIME ZONE 'UTC')::date"),
        "time" => format!("({expr} AT TIME ZONE 'UTC')::time"),
        _ => expr.to_string(),
    }
}

fn push_compound_member(b: &mut SqlBuilder, alias: &str, keys: &[String], kind: &str) {
    let (json_type, cast) = match kind {
        "number" => ("number", "::text::float8"),
        "boolean" => ("boolean", "::text::boolean"),
        _ => ("string", " #>> '{}'"),
    };
    let member = |b: &mut SqlBuilder| {
        b.push(&format!("{alias}.value_compound"));
        for key in keys {
            b.push(" -> ").push_bind(key.clone());
        }
    };
    b.push("(CASE WHEN jsonb_typeof(");
    member(b);
    b.push(&format!(") = '{json_type}' THEN ("));
    member(b);
    b.push(&format!("){cast} END)"));
}

fn push_literal(b: &mut SqlBuilder, value: &QueryValue) {
    match value {
        QueryValue::Text(s) => {
            b.push_bind(s.clone());
        }
        QueryValue::Number(n) => {
            b.push_bind(*n);
        }
        QueryValue::Boolean(v) => {
            b.push_bind(*v);
        }
        QueryValue::DateTime(t) => {
            b.push_bind(*t).push("::timestamptz");
        }
        QueryValue::Date(d) => {
            b.push_bind(*d).push("::date");
        }
        QueryValue::Time(t) => {
            b.push_bind(*t).push("::time");
        }
        QueryValue::List(_) | QueryValue::Range(_, _) => {
            b.push("NULL");
        }
    }
}

/// 地理谓词：五个几何列之间取 OR
pub fn push_geo(b: &mut SqlBuilder, geo: &GeoQuery, alias: &str) {
    let geometry = geo.geometry_json();
    b.push("(");
    b.push_separated(GeometryKind::ALL, " OR ", |b, kind| {
        let column = format!("{alias}.{}", kind.column());
        match geo.relation {
            GeoRelation::Near {
                max_distance,
                min_distance,
            } => {
                let (negate, distance) = match (max_distance, min_distance) {
                    (Some(max), _) => (false, max),
                    (None, Some(min)) => (true, min),
                    (None, None) => (false, 0.0),
                };
                if negate {
                    b.push("NOT ");
                }
                b.push(&format!("ST_DWithin({column}::geography, ST_SetSRID(ST_GeomFromGeoJSON("))
                    .push_bind(geometry.clone())
                    .push("), 4326)::geography, ")
                    .push_bind(distance)
                    .push(")");
            }
            relation => {
                let function = match relation {
                    GeoRelation::Equals => "ST_Equals",
                    GeoRelation::Disjoint => "ST_Disjoint",
                    GeoRelation::Within => "ST_Within",
                    GeoRelation::Contains => "ST_Contains",
                    GeoRelation::Overlaps => "ST_Overlaps",
                    GeoRelation::Intersects | GeoRelation::Near { .. } => "ST_Intersects",
                };
                b.push(&format!("{function}({column}, ST_SetSRID(ST_GeomFromGeoJSON("))
                    .push_bind(geometry.clone())
                    .push("), 4326))");
            }
        }
    });
    b.push(")");
}

/// 区间内属性实例查询；每个属性按时间取前 `limit` 行
pub fn instances_statement(query: &InstanceQuery) -> Statement {
    let column = time_column("ai", query.time.property());
    let direction = match query.order {
        SortOrder::Ascending => "ASC",
        SortOrder::Descending => "DESC",
    };

    let mut b = SqlBuilder::new();
    b.push(&format!(
        "SELECT instance_id, entity_id, attribute_id, operation_mode, {VALUE_COLUMNS}, \
         observed_at, ts, dataset_id, unit_code, has_sub_attributes FROM (\
         SELECT ai.*, row_number() OVER (PARTITION BY ai.attribute_id \
         ORDER BY {column} {direction}, ai.instance_id) AS rn \
         FROM {INSTANCE_TABLE} ai WHERE ai.entity_id = "
    ))
    .push_bind(query.interval.entity_id.clone());
    if !query.attributes.is_empty() {
        b.push(" AND ai.attribute_id IN (")
            .push_bind_list(query.attributes.iter().cloned())
            .push(")");
    }
    if query.time.property() == TimeProperty::CreatedAt {
        b.push(" AND ai.operation_mode = 'Create'");
    }
    b.push(" AND ")
        .push(&column)
        .push(" >= ")
        .push_bind(query.interval.start)
        .push(" AND ")
        .push(&column)
        .push(" <= ")
        .push_bind(query.interval.end)
        .push(" AND ");
    push_time_predicate(&mut b, &column, &query.time);
    b.push(") ranked WHERE rn <= ")
        .push_bind(query.limit as i64)
        .push(" ORDER BY attribute_id, rn");
    tracing::debug!(sql = b.sql(), "compiled instance query");
    b.build()
}

pub fn sub_instances_statement(parent_instance_ids: &[String]) -> Statement {
    let mut b = SqlBuilder::new();
    b.push(&format!(
        "SELECT instance_id, parent_instance_id, attribute_id, {VALUE_COLUMNS}, \
         observed_at, ts, dataset_id, unit_code FROM {SUB_INSTANCE_TABLE} \
         WHERE parent_instance_id IN ("
    ))
    .push_bind_list(parent_instance_ids.iter().cloned())
    .push(") ORDER BY ts");
    b.build()
}

pub fn entity_records_statement(entity_id: &str) -> Statement {
    let mut b = SqlBuilder::new();
    b.push(&format!(
        "SELECT entity_id, entity_type, operation_mode, ts FROM {ENTITY_TABLE} WHERE entity_id = "
    ))
    .push_bind(entity_id.to_string())
    .push(" ORDER BY ts");
    b.build()
}

pub fn create_timestamps_statement(entity_id: &str, attribute_id: &str) -> Statement {
    let mut b = SqlBuilder::new();
    b.push(&format!(
        "SELECT ts FROM {INSTANCE_TABLE} WHERE entity_id = "
    ))
    .push_bind(entity_id.to_string())
    .push(" AND attribute_id = ")
    .push_bind(attribute_id.to_string())
    .push(" AND operation_mode = 'Create' ORDER BY ts");
    b.build()
}

pub fn max_attribute_count_statement(entity_ids: &[String]) -> Statement {
    let mut b = SqlBuilder::new();
    b.push(&format!(
        "SELECT COALESCE(max(attributes), 0) AS attributes FROM (\
         SELECT entity_id, count(DISTINCT attribute_id) AS attributes FROM {INSTANCE_TABLE} \
         WHERE entity_id IN ("
    ))
    .push_bind_list(entity_ids.iter().cloned())
    .push(") GROUP BY entity_id) per_entity");
    b.build()
}
