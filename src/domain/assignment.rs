// ==========================================
// 堆场客户池分配引擎 - 箱位分配台账
// ==========================================
// StackAssignment 是箱位归属的持久台账
// 不变量: 任一时刻每个箱位最多一条有效的独占分配
// ==========================================

use crate::domain::types::PoolPriority;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// StackAssignment - 箱位分配记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackAssignment {
    pub id: String,
    pub stack_id: String,
    pub stack_number: i32,
    pub pool_id: String,
    pub client_code: String,
    pub is_exclusive: bool,
    pub priority: PoolPriority,
    pub assigned_at: NaiveDateTime,
    pub assigned_by: String,
}

// ==========================================
// AssignStackRequest - 分配请求
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignStackRequest {
    pub stack_id: String,
    pub stack_number: i32,
    pub pool_id: String,
    pub client_code: String,
    pub is_exclusive: bool,
    pub priority: PoolPriority,
    pub operator: String,
}

// ==========================================
// 批量分配结果（逐项成功/失败）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItemFailure {
    pub stack_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkAssignResult {
    pub succeeded: Vec<String>,
    pub failed: Vec<BulkItemFailure>,
}

impl BulkAssignResult {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}
