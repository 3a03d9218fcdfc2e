//! createdAt 解析
//!
//! 实例的 createdAt 是不晚于实例时间的最近一次 Create 时间；之前没有 Create 时取低水位哨兵。
//! 每个 (实体, 属性) 的 Create 时间列表在一次请求内只取一次。

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::query::time::LOW_WATER_MARK;
use crate::storage::repository::TemporalRepository;

/// 在升序的 Create 时间列表中查找 `ts` 对应的 createdAt
pub fn resolve_in(creates: &[DateTime<Utc>], ts: DateTime<Utc>) -> DateTime<Utc> {
    let mut resolved = LOW_WATER_MARK;
    for created in creates {
        if *created > ts {
            break;
        }
        resolved = *created;
    }
    resolved
}

pub struct CreatedAtResolver {
    repository: Arc<dyn TemporalRepository>,
    cache: HashMap<(String, String), Vec<DateTime<Utc>>>,
}

impl CreatedAtResolver {
    pub fn new(repository: Arc<dyn TemporalRepository>) -> Self {
        Self {
            repository,
            cache: HashMap::new(),
        }
    }

    pub async fn resolve(
        &mut self,
        entity_id: &str,
        attribute_id: &str,
        ts: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let key = (entity_id.to_string(), attribute_id.to_string());
        if let Some(creates) = self.cache.get(&key) {
            return Ok(resolve_in(creates, ts));
        }
        let creates = self
            .repository
            .create_timestamps(entity_id, attribute_id)
            .await?;
        tracing::trace!(entity_id, attribute_id, creates = creates.len(), "create timestamps loaded");
        let resolved = resolve_in(&creates, ts);
        self.cache.insert(key, creates);
        Ok(resolved)
    }

    /// 已缓存的 (实体, 属性) 数量
    #[cfg(test)]
    pub(crate) fn cached(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::repository::MockTemporalRepository;
    use chrono::{Duration, TimeZone};
    use rstest::rstest;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    #[rstest]
    #[case(15, Some(10))]
    #[case(10, Some(10))]
    #[case(25, Some(20))]
    #[case(4, None)]
    fn test_resolve_in(#[case] ts: i64, #[case] expected: Option<i64>) {
        let creates = [at(5), at(10), at(20)];
        let expected = expected.map(at).unwrap_or(LOW_WATER_MARK);
        assert_eq!(resolve_in(&creates, at(ts)), expected);
    }

    #[tokio::test]
    async fn test_create_timestamps_fetched_once_per_attribute() {
        let mut repository = MockTemporalRepository::new();
        repository
            .expect_create_timestamps()
            .times(1)
            .returning(|_, _| Ok(vec![at(0), at(10), at(20)]));
        let mut resolver = CreatedAtResolver::new(Arc::new(repository));

        assert_eq!(resolver.resolve("urn:a", "temp", at(15)).await.unwrap(), at(10));
        assert_eq!(resolver.resolve("urn:a", "temp", at(25)).await.unwrap(), at(20));
        assert_eq!(resolver.cached(), 1);
    }
}
