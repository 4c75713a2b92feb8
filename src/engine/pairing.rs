// ==========================================
// 堆场客户池分配引擎 - 40ft 配对规则表
// ==========================================
// 红线: 配对关系为固定枚举（与本堆场布局绑定），不得用公式推算
// 红线: 特殊箱位永不配对
// 约定: 配对 (a, b) 的 40ft 落箱身份为虚拟箱位 min(a, b) + 1
// ==========================================

use crate::domain::stack::Stack;
use crate::domain::types::YardZone;

/// 一条配对规则
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairRule {
    pub zone: YardZone,
    pub first: i32,
    pub second: i32,
}

const fn rule(zone: YardZone, first: i32, second: i32) -> PairRule {
    PairRule {
        zone,
        first,
        second,
    }
}

// ==========================================
// 分区配对表
// ==========================================
// A 区: 1 为特殊箱位，其余自 3 起两两配对
// B 区: 31/33 为特殊箱位，自 35 起配对，55 为排尾单箱位
// C 区: 自 57 起配对，77 为排尾单箱位，79 为特殊箱位
pub const PAIR_TABLE: &[PairRule] = &[
    rule(YardZone::ZoneA, 3, 5),
    rule(YardZone::ZoneA, 7, 9),
    rule(YardZone::ZoneA, 11, 13),
    rule(YardZone::ZoneA, 15, 17),
    rule(YardZone::ZoneA, 19, 21),
    rule(YardZone::ZoneA, 23, 25),
    rule(YardZone::ZoneA, 27, 29),
    rule(YardZone::ZoneB, 35, 37),
    rule(YardZone::ZoneB, 39, 41),
    rule(YardZone::ZoneB, 43, 45),
    rule(YardZone::ZoneB, 47, 49),
    rule(YardZone::ZoneB, 51, 53),
    rule(YardZone::ZoneC, 57, 59),
    rule(YardZone::ZoneC, 61, 63),
    rule(YardZone::ZoneC, 65, 67),
    rule(YardZone::ZoneC, 69, 71),
    rule(YardZone::ZoneC, 73, 75),
];

/// 特殊箱位（永不配对，始终保留完整单箱位容量）
pub const SPECIAL_STACKS: &[i32] = &[1, 31, 33, 79];

pub fn zone_of(stack_number: i32) -> Option<YardZone> {
    match stack_number {
        1..=29 => Some(YardZone::ZoneA),
        31..=55 => Some(YardZone::ZoneB),
        57..=79 => Some(YardZone::ZoneC),
        _ => None,
    }
}

pub fn is_special_stack_number(stack_number: i32) -> bool {
    SPECIAL_STACKS.contains(&stack_number)
}

/// 拓扑标记或固定特殊箱位表任一命中即为特殊箱位
pub fn is_special(stack: &Stack) -> bool {
    stack.is_special_stack || is_special_stack_number(stack.stack_number)
}

/// 查询配对伙伴编号（特殊箱位与未登记箱位返回 None）
pub fn partner_of(stack_number: i32) -> Option<i32> {
    if is_special_stack_number(stack_number) {
        return None;
    }
    PAIR_TABLE.iter().find_map(|r| {
        if r.first == stack_number {
            Some(r.second)
        } else if r.second == stack_number {
            Some(r.first)
        } else {
            None
        }
    })
}

/// 配对键（与顺序无关: "3,5" 与 "5,3" 相同）
pub fn pair_key(a: i32, b: i32) -> (i32, i32) {
    (a.min(b), a.max(b))
}

/// 配对的虚拟箱位编号
pub fn virtual_stack_number(a: i32, b: i32) -> i32 {
    a.min(b) + 1
}

/// 由虚拟箱位编号反查物理配对
pub fn pair_for_virtual(virtual_number: i32) -> Option<(i32, i32)> {
    if virtual_number % 2 != 0 {
        return None;
    }
    let lower = virtual_number - 1;
    match partner_of(lower) {
        Some(partner) if partner == virtual_number + 1 => Some((lower, partner)),
        _ => None,
    }
}

/// 是否为合法派生的虚拟箱位
pub fn is_valid_virtual(virtual_number: i32) -> bool {
    pair_for_virtual(virtual_number).is_some()
}
