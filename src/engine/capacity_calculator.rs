// ==========================================
// 堆场客户池分配引擎 - 有效容量计算器
// ==========================================
// 职责: 计算去除 40ft 配对重复计数后的有效容量
// 红线: 纯函数、无状态；配对消耗集合只在单次调用内存在
// 红线: 有效配对的合计容量恰为一个成员的单箱位容量，绝不求和
// ==========================================

use crate::domain::stack::{CapacityInfo, Stack};
use crate::domain::types::ContainerSize;
use crate::engine::pairing;
use std::collections::{HashMap, HashSet};
use tracing::instrument;

// ==========================================
// CapacityCalculator - 有效容量计算器
// ==========================================
#[derive(Debug, Default, Clone, Copy)]
pub struct CapacityCalculator {
    // 无状态引擎，可被任意数量调用方并发使用
}

impl CapacityCalculator {
    pub fn new() -> Self {
        Self {}
    }

    /// 逐箱位计算有效容量
    ///
    /// 规则:
    /// 1) 虚拟箱位计 0（视为已被其物理成员计入）
    /// 2) 20ft 箱位 = 单箱位容量
    /// 3) 40ft 箱位: 特殊箱位或伙伴不在输入中 → 单箱位容量；
    ///    伙伴在输入中 → 同一配对只计一次，计入值为编号较小成员的容量，
    ///    先遇到的成员承载该值，后遇到的成员计 0
    ///
    /// 配对消耗集合以排序后的配对为键，因此对相同输入重复调用、或调换输入顺序，
    /// 合计值都不变。
    #[instrument(skip(self, stacks), fields(stacks_count = stacks.len()))]
    pub fn effective_capacities(&self, stacks: &[Stack]) -> Vec<CapacityInfo> {
        // 可参与配对的 40ft 物理箱位（按编号索引）
        let pairable: HashMap<i32, &Stack> = stacks
            .iter()
            .filter(|s| Self::is_pairable(s))
            .map(|s| (s.stack_number, s))
            .collect();

        let mut consumed_pairs: HashSet<(i32, i32)> = HashSet::new();

        stacks
            .iter()
            .map(|stack| {
                let individual = stack.capacity();
                let info = |effective: i32, paired_with: Option<i32>, reason: String| CapacityInfo {
                    stack_id: stack.id.clone(),
                    stack_number: stack.stack_number,
                    individual_capacity: individual,
                    effective_capacity: effective,
                    paired_with,
                    reason,
                };

                if stack.is_virtual_identity() {
                    return info(0, None, "VIRTUAL: 虚拟箱位已由物理成员计入".to_string());
                }

                if stack.container_size_capability == ContainerSize::Feet20 {
                    return info(individual, None, "SIZE_20FT: 单箱位容量".to_string());
                }

                if pairing::is_special(stack) {
                    return info(individual, None, "SPECIAL: 特殊箱位不配对".to_string());
                }

                let partner = pairing::partner_of(stack.stack_number)
                    .and_then(|p| pairable.get(&p).copied());

                let Some(partner) = partner else {
                    return info(individual, None, "UNPAIRED: 伙伴不在输入中".to_string());
                };

                let key = pairing::pair_key(stack.stack_number, partner.stack_number);
                if consumed_pairs.insert(key) {
                    let lower = if stack.stack_number < partner.stack_number {
                        stack
                    } else {
                        partner
                    };
                    info(
                        lower.capacity(),
                        Some(partner.stack_number),
                        format!("PAIRED: 配对 {},{} 计入一次", key.0, key.1),
                    )
                } else {
                    info(
                        0,
                        Some(partner.stack_number),
                        format!("PAIRED_CONSUMED: 配对 {},{} 已计入", key.0, key.1),
                    )
                }
            })
            .collect()
    }

    /// 有效容量合计
    pub fn total_effective_capacity(&self, stacks: &[Stack]) -> i32 {
        self.effective_capacities(stacks)
            .iter()
            .map(|c| c.effective_capacity)
            .sum()
    }

    /// 有效占用合计（客户池占用计数的口径）
    ///
    /// 40ft 进出闸同时计入配对的两个成员，因此两成员同在输入中时，
    /// 配对只计一次，取两成员中较大的计数。虚拟箱位计 0，重复的箱位只计一次。
    pub fn effective_occupancy(&self, stacks: &[Stack]) -> i32 {
        let pairable: HashMap<i32, &Stack> = stacks
            .iter()
            .filter(|s| Self::is_pairable(s))
            .map(|s| (s.stack_number, s))
            .collect();

        let mut seen: HashSet<&str> = HashSet::new();
        let mut consumed_pairs: HashSet<(i32, i32)> = HashSet::new();

        stacks
            .iter()
            .filter(|s| !s.is_virtual_identity())
            .filter(|s| seen.insert(s.id.as_str()))
            .map(|stack| {
                let own = stack.current_occupancy.max(0);
                if !Self::is_pairable(stack) {
                    return own;
                }
                let partner = pairing::partner_of(stack.stack_number)
                    .and_then(|p| pairable.get(&p).copied());
                match partner {
                    None => own,
                    Some(partner) => {
                        let key = pairing::pair_key(stack.stack_number, partner.stack_number);
                        if consumed_pairs.insert(key) {
                            own.max(partner.current_occupancy.max(0))
                        } else {
                            0
                        }
                    }
                }
            })
            .fold(0i32, |acc, n| acc.saturating_add(n))
    }

    fn is_pairable(stack: &Stack) -> bool {
        !stack.is_virtual_identity()
            && stack.container_size_capability == ContainerSize::Feet40
            && !pairing::is_special(stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stack::test_support::stack;

    fn calc() -> CapacityCalculator {
        CapacityCalculator::new()
    }

    #[test]
    fn test_valid_pair_counted_once_in_any_order() {
        // 3: 6×5=30, 5: 5×5=25
        let s3 = stack(3, ContainerSize::Feet40, 6, 5);
        let s5 = stack(5, ContainerSize::Feet40, 5, 5);

        let forward = vec![s3.clone(), s5.clone()];
        let reversed = vec![s5, s3];

        assert_eq!(calc().total_effective_capacity(&forward), 30);
        assert_eq!(calc().total_effective_capacity(&reversed), 30);
        // 重复调用幂等
        assert_eq!(calc().total_effective_capacity(&forward), 30);
    }

    #[test]
    fn test_virtual_stack_contributes_zero() {
        let mut v = stack(4, ContainerSize::Feet40, 6, 5);
        v.is_virtual = true;
        let infos = calc().effective_capacities(&[v]);
        assert_eq!(infos[0].effective_capacity, 0);
        assert_eq!(infos[0].individual_capacity, 30);
    }

    #[test]
    fn test_special_stack_keeps_full_capacity() {
        let mut special = stack(1, ContainerSize::Feet40, 4, 5);
        special.is_special_stack = true;
        let s3 = stack(3, ContainerSize::Feet40, 6, 5);
        let infos = calc().effective_capacities(&[special, s3]);
        assert_eq!(infos[0].effective_capacity, 20);
        assert_eq!(infos[0].paired_with, None);
        // 3 的伙伴 5 不在输入中
        assert_eq!(infos[1].effective_capacity, 30);
    }

    #[test]
    fn test_twenty_foot_partner_does_not_form_pair() {
        let s3 = stack(3, ContainerSize::Feet40, 6, 5);
        let s5 = stack(5, ContainerSize::Feet20, 5, 5);
        assert_eq!(calc().total_effective_capacity(&[s3, s5]), 55);
    }

    #[test]
    fn test_total_never_exceeds_individual_sum() {
        let stacks: Vec<Stack> = (0..15)
            .map(|i| {
                let n = 2 * i + 1;
                let size = if i % 3 == 0 {
                    ContainerSize::Feet20
                } else {
                    ContainerSize::Feet40
                };
                stack(n, size, 4 + (i % 3), 5)
            })
            .collect();

        let individual_sum: i32 = stacks.iter().map(|s| s.capacity()).sum();
        let total = calc().total_effective_capacity(&stacks);
        assert!(total < individual_sum, "输入包含有效配对，合计应严格小于单箱位之和");

        let unpaired: Vec<Stack> = stacks
            .into_iter()
            .filter(|s| s.container_size_capability == ContainerSize::Feet20)
            .collect();
        let sum: i32 = unpaired.iter().map(|s| s.capacity()).sum();
        assert_eq!(calc().total_effective_capacity(&unpaired), sum);
    }

    #[test]
    fn test_duplicate_entries_do_not_double_count_pair() {
        let s3 = stack(3, ContainerSize::Feet40, 6, 5);
        let s5 = stack(5, ContainerSize::Feet40, 5, 5);
        let total = calc().total_effective_capacity(&[s3.clone(), s5, s3]);
        assert_eq!(total, 30);
    }

    #[test]
    fn test_effective_occupancy_counts_pair_once() {
        let mut s3 = stack(3, ContainerSize::Feet40, 6, 5);
        let mut s5 = stack(5, ContainerSize::Feet40, 5, 5);
        let mut s7 = stack(7, ContainerSize::Feet20, 4, 4);
        // 一个 40ft 箱同时计入 3 与 5
        s3.current_occupancy = 2;
        s5.current_occupancy = 1;
        s7.current_occupancy = 4;

        assert_eq!(calc().effective_occupancy(&[s3.clone(), s5.clone(), s7.clone()]), 6);
        assert_eq!(calc().effective_occupancy(&[s5.clone(), s7.clone(), s3.clone()]), 6);
        // 伙伴不在输入中时按自身计数
        assert_eq!(calc().effective_occupancy(&[s5.clone()]), 1);
        // 重复条目只计一次
        assert_eq!(calc().effective_occupancy(&[s7.clone(), s7]), 4);

        let mut v = stack(4, ContainerSize::Feet40, 6, 5);
        v.is_virtual = true;
        v.current_occupancy = 9;
        assert_eq!(calc().effective_occupancy(&[v, s3, s5]), 2);
    }

    #[test]
    fn test_concurrent_invocations_are_independent() {
        let stacks = vec![
            stack(3, ContainerSize::Feet40, 6, 5),
            stack(5, ContainerSize::Feet40, 5, 5),
            stack(7, ContainerSize::Feet40, 4, 5),
            stack(9, ContainerSize::Feet40, 4, 5),
        ];
        let shared = std::sync::Arc::new(stacks);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stacks = shared.clone();
                std::thread::spawn(move || calc().total_effective_capacity(&stacks))
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 50);
        }
    }
}
