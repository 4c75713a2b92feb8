//! 有效容量/有效占用的性质测试

use proptest::prelude::*;

use yard_pool::domain::{ContainerSize, Stack};
use yard_pool::engine::{pairing, CapacityCalculator};

use crate::test_helpers::make_stack;

/// 箱位编号组: 任意奇数编号、配对表中的一对、或特殊箱位
fn number_groups() -> impl Strategy<Value = Vec<i32>> {
    proptest::collection::vec(
        prop_oneof![
            (0..40i32).prop_map(|i| vec![2 * i + 1]),
            proptest::sample::select(pairing::PAIR_TABLE.to_vec())
                .prop_map(|r| vec![r.first, r.second]),
            proptest::sample::select(pairing::SPECIAL_STACKS.to_vec()).prop_map(|n| vec![n]),
        ],
        0..8,
    )
    .prop_map(|groups| {
        let mut numbers: Vec<i32> = Vec::new();
        for n in groups.into_iter().flatten() {
            if !numbers.contains(&n) {
                numbers.push(n);
            }
        }
        numbers
    })
}

/// 随机箱位集合（尺寸、排数、层数、占用随机，顺序打乱）
fn stack_set() -> impl Strategy<Value = Vec<Stack>> {
    number_groups()
        .prop_flat_map(|numbers| {
            let len = numbers.len();
            (
                Just(numbers),
                proptest::collection::vec((any::<bool>(), 1..10i32, 1..10i32, 0..20i32), len),
            )
        })
        .prop_map(|(numbers, attrs)| {
            numbers
                .into_iter()
                .zip(attrs)
                .map(|(number, (is_40ft, rows, tiers, occupancy))| {
                    let size = if is_40ft {
                        ContainerSize::Feet40
                    } else {
                        ContainerSize::Feet20
                    };
                    let mut stack = make_stack(number, size, rows, tiers);
                    stack.is_special_stack = pairing::is_special_stack_number(number);
                    stack.current_occupancy = occupancy;
                    stack
                })
                .collect::<Vec<Stack>>()
        })
        .prop_flat_map(|stacks| Just(stacks).prop_shuffle())
}

/// 同一集合与它的一个随机排列
fn stack_set_and_permutation() -> impl Strategy<Value = (Vec<Stack>, Vec<Stack>)> {
    stack_set().prop_flat_map(|stacks| (Just(stacks.clone()), Just(stacks).prop_shuffle()))
}

fn contains_valid_pair(stacks: &[Stack]) -> bool {
    let pairable: Vec<i32> = stacks
        .iter()
        .filter(|s| s.container_size_capability == ContainerSize::Feet40 && !pairing::is_special(s))
        .map(|s| s.stack_number)
        .collect();
    pairable
        .iter()
        .any(|n| pairing::partner_of(*n).is_some_and(|p| pairable.contains(&p)))
}

fn numbers(stacks: &[Stack]) -> Vec<i32> {
    stacks.iter().map(|s| s.stack_number).collect()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    /// PROPERTY: 有效容量合计不超过单箱位容量之和，且仅在没有有效配对时相等
    #[test]
    fn property_total_bounded_by_individual_sum(stacks in stack_set()) {
        let calc = CapacityCalculator::new();
        let total = calc.total_effective_capacity(&stacks);
        let sum: i32 = stacks.iter().map(|s| s.capacity()).sum();

        prop_assert!(total <= sum, "set {:?}: total={}, sum={}", numbers(&stacks), total, sum);
        prop_assert_eq!(
            total == sum,
            !contains_valid_pair(&stacks),
            "set {:?}: total={}, sum={}",
            numbers(&stacks),
            total,
            sum
        );
    }

    /// PROPERTY: 有效容量合计与输入顺序无关
    #[test]
    fn property_total_is_order_independent((stacks, permuted) in stack_set_and_permutation()) {
        let calc = CapacityCalculator::new();
        prop_assert_eq!(
            calc.total_effective_capacity(&stacks),
            calc.total_effective_capacity(&permuted),
            "set {:?} vs {:?}",
            numbers(&stacks),
            numbers(&permuted)
        );
    }

    /// PROPERTY: 有效占用不超过成员占用之和，且与输入顺序无关
    #[test]
    fn property_effective_occupancy_bounded_and_order_independent(
        (stacks, permuted) in stack_set_and_permutation()
    ) {
        let calc = CapacityCalculator::new();
        let occupancy = calc.effective_occupancy(&stacks);
        let sum: i32 = stacks.iter().map(|s| s.current_occupancy).sum();

        prop_assert!(occupancy >= 0);
        prop_assert!(occupancy <= sum, "set {:?}: occupancy={}, sum={}", numbers(&stacks), occupancy, sum);
        prop_assert_eq!(occupancy, calc.effective_occupancy(&permuted));
    }
}
