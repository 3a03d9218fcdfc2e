//! 存储层模块
//!
//! 只读访问时态日志，支持 PostgreSQL 与内存两种后端。

pub mod compiler;
pub mod factory;
pub mod memory;
pub mod postgres;
pub mod repository;
pub mod sql;

pub use factory::StorageFactory;
pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;
pub use repository::{
    EntityFilter, InstanceQuery, IntervalQuery, PageRequest, SortOrder, TemporalRepository,
};
