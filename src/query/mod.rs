//! 查询模块
//!
//! - `ast`: 查询条件语法树
//! - `parser`: `q` 参数解析
//! - `literal`: 字面量分类与兼容性检查
//! - `evaluate`: 比较项在内存中的求值
//! - `geo`: 地理谓词
//! - `time`: 时间谓词

pub mod ast;
pub mod evaluate;
pub mod geo;
pub mod literal;
pub mod parser;
pub mod time;

pub use ast::{
    ComparisonOperator, ComparisonTerm, LogicalOperator, LogicalTerm, QueryTerm, QueryValue,
    ValueTarget,
};
pub use geo::{GeoQuery, GeoRelation};
pub use parser::QueryParser;
pub use time::{
    LOW_WATER_MARK, TimeProperty, TimeQuery, TimeRelation, TimeWindow, high_water_mark,
};
