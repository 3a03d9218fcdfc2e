//! 存储工厂模块
//!
//! 根据配置创建相应的时态仓储实例。

use std::sync::Arc;

use crate::config::config::{DatabaseConfig, StorageBackend};
use crate::error::Result;
use crate::storage::memory::MemoryRepository;
use crate::storage::postgres::PostgresRepository;
use crate::storage::repository::TemporalRepository;

/// 存储工厂
pub struct StorageFactory;

impl StorageFactory {
    /// 根据配置创建仓储
    pub async fn create(config: &DatabaseConfig) -> Result<Arc<dyn TemporalRepository>> {
        match config.backend {
            StorageBackend::Postgres => {
                let repository = PostgresRepository::connect(config).await?;
                repository.ping().await?;
                Ok(Arc::new(repository))
            }
            StorageBackend::Memory => {
                tracing::warn!("using the in-memory temporal log, data is not persisted");
                Ok(Arc::new(MemoryRepository::new()))
            }
        }
    }
}
