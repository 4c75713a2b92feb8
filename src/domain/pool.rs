// ==========================================
// 堆场客户池分配引擎 - 客户池领域模型
// ==========================================
// 生命周期: 合同签订时创建 → 合同期内箱位集合变动 → 合同终止时删除/停用并释放箱位
// 不变量: assigned_stacks 必须与指向该池的有效 StackAssignment 集合完全一致
// ==========================================

use crate::domain::types::PoolPriority;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ==========================================
// ContractWindow - 合同期
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractWindow {
    pub start: NaiveDate,
    pub end: Option<NaiveDate>, // None = 无固定终止日
}

impl ContractWindow {
    pub fn open_ended(start: NaiveDate) -> Self {
        Self { start, end: None }
    }

    /// 终止日不得早于起始日
    pub fn is_well_formed(&self) -> bool {
        match self.end {
            Some(end) => end >= self.start,
            None => true,
        }
    }

    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.start && self.end.map_or(true, |end| date <= end)
    }
}

// ==========================================
// ClientPool - 客户池
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientPool {
    // ===== 标识 =====
    pub id: String,
    pub client_id: String,
    pub client_code: String, // 业务唯一键（有效池范围内）
    pub client_name: String,
    pub yard_id: String,

    // ===== 箱位与容量 =====
    pub assigned_stacks: BTreeSet<String>, // 物理箱位 id
    pub max_capacity: i32,                 // 有效容量合计（已扣除 40ft 重复计数）
    pub current_occupancy: i32,

    // ===== 合同 =====
    pub priority: PoolPriority,
    pub contract: ContractWindow,
    pub is_active: bool,
    pub notes: Option<String>,

    // ===== 审计 =====
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub created_by: String,
    pub updated_by: String,
}

impl ClientPool {
    /// 占用百分比（0 ~ 100，max_capacity 为 0 时返回 0）
    pub fn occupancy_percent(&self) -> f64 {
        if self.max_capacity <= 0 {
            return 0.0;
        }
        self.current_occupancy as f64 / self.max_capacity as f64 * 100.0
    }

    pub fn owns(&self, stack_id: &str) -> bool {
        self.assigned_stacks.contains(stack_id)
    }
}

// ==========================================
// CreatePoolRequest - 创建客户池请求
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePoolRequest {
    pub client_id: String,
    pub client_code: String,
    pub client_name: String,
    pub yard_id: String,
    pub initial_stacks: Vec<String>,
    /// 为空时按初始箱位的有效容量计算
    pub max_capacity: Option<i32>,
    pub priority: PoolPriority,
    pub contract: ContractWindow,
    pub notes: Option<String>,
    pub operator: String,
}

// ==========================================
// PoolUpdate - 客户池更新（字段为 None 表示不变）
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolUpdate {
    pub client_name: Option<String>,
    pub assigned_stacks: Option<BTreeSet<String>>,
    pub max_capacity: Option<i32>,
    pub priority: Option<PoolPriority>,
    pub contract: Option<ContractWindow>,
    pub is_active: Option<bool>,
    pub notes: Option<String>,
}

impl PoolUpdate {
    pub fn with_stacks<I, S>(stacks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            assigned_stacks: Some(stacks.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    /// 停用客户池（合同终止）
    pub fn deactivate() -> Self {
        Self {
            is_active: Some(false),
            ..Default::default()
        }
    }
}

// ==========================================
// PoolStats - 客户池统计
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub total_pools: usize,
    pub active_clients: usize,
    pub total_assigned_stacks: usize,
    pub average_occupancy_percent: f64,
    pub unassigned_stacks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_window() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 12, 31).unwrap();
        let window = ContractWindow { start, end: Some(end) };
        assert!(window.is_well_formed());
        assert!(window.covers(NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()));
        assert!(!window.covers(NaiveDate::from_ymd_opt(2027, 1, 1).unwrap()));

        let broken = ContractWindow { start: end, end: Some(start) };
        assert!(!broken.is_well_formed());
        assert!(ContractWindow::open_ended(start).covers(NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()));
    }
}
