// ==========================================
// 堆场客户池分配引擎 - 应用层
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};
