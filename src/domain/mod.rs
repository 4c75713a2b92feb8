// ==========================================
// 堆场客户池分配引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、位置编码
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod assignment;
pub mod location;
pub mod pool;
pub mod stack;
pub mod types;

// 重导出核心类型
pub use assignment::{AssignStackRequest, BulkAssignResult, BulkItemFailure, StackAssignment};
pub use location::{is_valid_location_format, LocationFormatError, LocationId};
pub use pool::{ClientPool, ContractWindow, CreatePoolRequest, PoolStats, PoolUpdate};
pub use stack::{CapacityInfo, Stack, YardPosition};
pub use types::{ContainerSize, PoolPriority, YardZone};
