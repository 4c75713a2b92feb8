// ==========================================
// 堆场客户池分配引擎 - 配置层
// ==========================================
// 职责: 系统配置管理
// 存储: config_kv 表
// ==========================================

pub mod allocation_config;
pub mod config_manager;

// 重导出
pub use allocation_config::{AllocationConfig, OccupiedReleasePolicy};
pub use config_manager::{config_keys, ConfigManager};
