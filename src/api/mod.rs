// ==========================================
// 堆场客户池分配引擎 - API 层
// ==========================================
// 职责: 对外业务接口；组合存储端口与引擎，统一错误为 ApiError
// ==========================================

pub mod error;
pub mod placement_api;
pub mod pool_api;

pub use error::{ApiError, ApiResult};
pub use placement_api::{OccupancyChange, PlacementApi};
pub use pool_api::PoolApi;
