use crate::config::config::{AppConfig, StorageBackend};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::path::PathBuf;

const ENV_PREFIX: &str = "TEMPORA_";

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从默认路径加载配置
    ///
    /// 搜索路径：
    /// 1. 内置开发配置
    /// 2. ./config.toml
    /// 3. 环境变量（TEMPORA_ 前缀，`__` 分隔层级）
    pub fn load() -> Result<AppConfig, figment::Error> {
        Self::load_from(default_config_path())
    }

    /// 从指定路径加载配置
    pub fn load_from(path: PathBuf) -> Result<AppConfig, figment::Error> {
        Figment::from(Serialized::defaults(AppConfig::development()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// 验证配置
    pub fn validate(config: &AppConfig) -> Result<(), ConfigValidationError> {
        if config.server.port == 0 {
            return Err(ConfigValidationError::InvalidPort);
        }

        if config.database.backend == StorageBackend::Postgres && config.database.url.is_empty() {
            return Err(ConfigValidationError::MissingDatabaseUrl);
        }

        if config.query.result_ceiling == 0 {
            return Err(ConfigValidationError::InvalidCeiling);
        }

        if config.query.default_page_size == 0
            || config.query.default_page_size > config.query.max_page_size
        {
            return Err(ConfigValidationError::InvalidPageSize(
                config.query.default_page_size,
            ));
        }

        if config.context.capacity == 0 {
            return Err(ConfigValidationError::InvalidCacheCapacity);
        }

        Ok(())
    }
}

/// 配置验证错误
#[derive(thiserror::Error, Debug)]
pub enum ConfigValidationError {
    #[error("服务端口无效，必须大于 0")]
    InvalidPort,

    #[error("数据库连接 URL 未配置")]
    MissingDatabaseUrl,

    #[error("结果上限无效，必须大于 0")]
    InvalidCeiling,

    #[error("默认分页大小无效: {0}")]
    InvalidPageSize(u32),

    #[error("上下文缓存容量无效，必须大于 0")]
    InvalidCacheCapacity,
}

/// 获取默认配置文件路径
pub fn default_config_path() -> PathBuf {
    PathBuf::from("config.toml")
}
