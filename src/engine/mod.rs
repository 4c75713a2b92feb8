// ==========================================
// 堆场客户池分配引擎 - 引擎层
// ==========================================
// 职责: 纯规则计算（配对、有效容量、可用箱位、落箱校验）
// 红线: Engine 不访问存储，输入均为只读快照；所有结果必须带 reason
// ==========================================

pub mod availability;
pub mod capacity_calculator;
pub mod pairing;
pub mod placement_validator;

// 重导出核心引擎
pub use availability::{AvailabilityRequest, AvailabilityResolver, PositionSlot, StackCandidate};
pub use capacity_calculator::CapacityCalculator;
pub use placement_validator::{
    LedgerIntegrityError, PlacementContext, PlacementRejection, PlacementRequest,
    PlacementValidation, PlacementValidator,
};
