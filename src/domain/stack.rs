// ==========================================
// 堆场客户池分配引擎 - 箱位领域模型
// ==========================================
// 来源: Stack Topology（外部协作方，本引擎只读）
// 约定: 物理箱位编号为奇数；偶数编号只作为 40ft 虚拟箱位存在
// ==========================================

use crate::domain::types::ContainerSize;
use serde::{Deserialize, Serialize};

// ==========================================
// YardPosition - 箱位坐标
// ==========================================
/// 箱位在堆场中的平面坐标（原点为闸口）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YardPosition {
    pub x: i32,
    pub y: i32,
}

impl YardPosition {
    /// 与堆场原点的曼哈顿距离，用作闸口距离的近似
    pub fn manhattan_from_origin(&self) -> u32 {
        self.x.unsigned_abs() + self.y.unsigned_abs()
    }
}

// ==========================================
// Stack - 箱位（堆垛通道）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stack {
    // ===== 标识 =====
    pub id: String,
    pub yard_id: String,
    pub stack_number: i32, // 同一堆场内唯一
    pub section_id: String,

    // ===== 几何 =====
    pub rows: i32,
    pub max_tiers: i32,
    pub position: Option<YardPosition>,

    // ===== 能力 =====
    pub container_size_capability: ContainerSize,
    pub is_special_stack: bool, // 特殊箱位永不配对
    pub is_virtual: bool,       // 虚拟箱位不独立存储，出现时容量计 0

    // ===== 占用 =====
    pub current_occupancy: i32,
}

impl Stack {
    /// 单箱位容量 = rows × max_tiers
    pub fn capacity(&self) -> i32 {
        self.rows.max(0).saturating_mul(self.max_tiers.max(0))
    }

    /// 是否为虚拟身份（显式标记或偶数编号）
    pub fn is_virtual_identity(&self) -> bool {
        self.is_virtual || self.stack_number % 2 == 0
    }

    /// 剩余可用箱位数（不小于 0）
    pub fn available_slots(&self) -> i32 {
        self.capacity().saturating_sub(self.current_occupancy).max(0)
    }

    /// 占用率（容量为 0 时返回 0）
    pub fn occupancy_ratio(&self) -> f64 {
        let capacity = self.capacity();
        if capacity <= 0 {
            return 0.0;
        }
        self.current_occupancy as f64 / capacity as f64
    }

    /// 该箱位是否能直接接收指定尺寸的箱子
    ///
    /// 40ft 箱位同样可以堆放 20ft 箱；20ft 箱位只接收 20ft 箱。
    /// 40ft 箱还需满足配对规则，见 engine::pairing。
    pub fn accepts(&self, size: ContainerSize) -> bool {
        match size {
            ContainerSize::Feet20 => true,
            ContainerSize::Feet40 => self.container_size_capability == ContainerSize::Feet40,
        }
    }
}

// ==========================================
// CapacityInfo - 有效容量计算结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityInfo {
    pub stack_id: String,
    pub stack_number: i32,
    pub individual_capacity: i32,
    pub effective_capacity: i32,
    /// 配对伙伴编号（仅当伙伴出现在同一输入中）
    pub paired_with: Option<i32>,
    pub reason: String,
}
