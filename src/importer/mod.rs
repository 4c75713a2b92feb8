// ==========================================
// 堆场客户池分配引擎 - 导入模块
// ==========================================
// 职责: 一次性迁移（从集装箱位置文本回填箱位占用计数）
// 说明: 日常占用只由进出闸原子增量维护，文本解析只在回填时使用
// ==========================================

pub mod error;
pub mod occupancy_backfill;

pub use error::{ImportError, ImportResult};
pub use occupancy_backfill::{
    BackfillReport, ContainerInventorySource, ContainerRecord, CsvContainerInventory,
    OccupancyBackfill,
};
