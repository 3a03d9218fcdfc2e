//! 上下文模块
//!
//! 获取并缓存 JSON-LD 上下文文档，将属性和类型短名展开为完整 IRI。

pub mod cache;
pub mod document;
pub mod loader;

pub use cache::ContextCache;
pub use document::{
    CORE_NAMESPACE, ContextDocument, ResolvedContext, WELL_KNOWN_NAMES, is_well_known,
};
pub use loader::{ContextLoader, HttpContextLoader, StaticContextLoader};
