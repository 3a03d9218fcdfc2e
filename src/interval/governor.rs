//! 返回行数控制
//!
//! 一次请求返回的属性实例总行数不超过上限，按实体数与属性数平分到每个属性。

/// 单个属性可返回的实例行数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceBudget {
    /// 每个属性最多返回的行数
    pub per_attribute: u32,
    /// 请求的 lastN 已超过份额
    pub limited: bool,
    /// 未指定 lastN 时多取一行用于判断是否被截断
    probe: bool,
}

impl InstanceBudget {
    /// 向存储请求的行数
    pub fn fetch_limit(&self) -> u32 {
        if self.probe {
            self.per_attribute.saturating_add(1)
        } else {
            self.per_attribute
        }
    }

    /// 某属性取回 `fetched` 行后是否需要截断
    pub fn exceeded_by(&self, fetched: usize) -> bool {
        fetched > self.per_attribute as usize
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResultGovernor {
    ceiling: u32,
}

impl ResultGovernor {
    pub fn new(ceiling: u32) -> Self {
        Self {
            ceiling: ceiling.max(1),
        }
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// 计算每个属性的行数上限
    pub fn budget(
        &self,
        last_n: Option<u32>,
        entity_count: usize,
        attribute_count: usize,
    ) -> InstanceBudget {
        let divisor = (entity_count.max(1) as u64) * (attribute_count.max(1) as u64);
        let share = (self.ceiling as u64 / divisor) as u32;
        let budget = match last_n {
            Some(requested) => InstanceBudget {
                per_attribute: requested.min(share).max(1),
                limited: requested > share,
                probe: false,
            },
            None => InstanceBudget {
                per_attribute: share.max(1),
                limited: false,
                probe: true,
            },
        };
        tracing::debug!(
            ?last_n,
            entity_count,
            attribute_count,
            per_attribute = budget.per_attribute,
            limited = budget.limited,
            "instance budget"
        );
        budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some(5), 2, 3, 5, false)]
    #[case(Some(1000), 2, 3, 166, true)]
    #[case(None, 2, 3, 166, false)]
    #[case(None, 1, 1, 1000, false)]
    #[case(None, 2000, 1, 1, false)]
    #[case(Some(10), 0, 0, 10, false)]
    fn test_per_attribute_cap(
        #[case] last_n: Option<u32>,
        #[case] entities: usize,
        #[case] attributes: usize,
        #[case] cap: u32,
        #[case] limited: bool,
    ) {
        let budget = ResultGovernor::new(1000).budget(last_n, entities, attributes);
        assert_eq!(budget.per_attribute, cap);
        assert_eq!(budget.limited, limited);
    }

    #[test]
    fn test_probe_row_without_last_n() {
        let governor = ResultGovernor::new(1000);
        let open = governor.budget(None, 2, 3);
        assert_eq!(open.fetch_limit(), 167);
        assert!(open.exceeded_by(167));
        assert!(!open.exceeded_by(166));

        let last = governor.budget(Some(5), 2, 3);
        assert_eq!(last.fetch_limit(), 5);
    }
}
