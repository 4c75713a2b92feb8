// ==========================================
// 堆场客户池分配引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// 结构: 端口（trait） + 适配器（SQLite 生产 / 内存测试）
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod allocation_store;
pub mod error;
pub mod memory_store;
pub mod retry;
pub mod sqlite_store;
pub mod stack_repo;
pub mod stack_topology;

// 重导出端口与适配器
pub use allocation_store::AllocationStore;
pub use error::{RepositoryError, RepositoryResult};
pub use memory_store::{InMemoryAllocationStore, InMemoryStackTopology};
pub use retry::{with_retry, RetryPolicy};
pub use sqlite_store::SqliteAllocationStore;
pub use stack_repo::SqliteStackTopology;
pub use stack_topology::StackTopology;
