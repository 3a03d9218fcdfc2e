//! 数据模型模块

pub mod attribute;
pub mod entity_record;
pub mod temporal_entity;

pub use attribute::{
    AttributeInstance, AttributeValue, GeometryKind, OperationMode, SubAttributeInstance,
};
pub use entity_record::{EntityRecord, EntityState, state_at};
pub use temporal_entity::{RenderOptions, TemporalEntity, TemporalInstance, format_datetime};
