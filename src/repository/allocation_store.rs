// ==========================================
// 堆场客户池分配引擎 - 客户池/分配台账存储端口
// ==========================================
// 职责: 定义客户池与箱位分配台账的数据访问接口
// 实现者: SqliteAllocationStore（生产） / InMemoryAllocationStore（测试）
// 红线: 存储不含业务规则；但独占归属的条件写入必须在存储边界内完成
// ==========================================

use crate::domain::assignment::StackAssignment;
use crate::domain::pool::ClientPool;
use crate::repository::error::RepositoryResult;
use std::collections::HashSet;

// ==========================================
// AllocationStore Trait
// ==========================================
pub trait AllocationStore: Send + Sync {
    // ===== 客户池 =====

    /// 原子创建客户池及其初始分配
    ///
    /// # 返回
    /// - Err(ActivePoolExists): client_code 已有有效客户池
    /// - Err(ExclusiveAssignmentConflict): 初始箱位已被其他池占用
    ///
    /// 失败时不写入任何数据
    fn create_pool(&self, pool: &ClientPool, assignments: &[StackAssignment])
        -> RepositoryResult<()>;

    /// 保存客户池标量字段（不修改 assigned_stacks）
    fn save_pool(&self, pool: &ClientPool) -> RepositoryResult<()>;

    /// 删除客户池并撤销其全部有效分配
    ///
    /// # 返回
    /// 被释放的箱位 id 列表
    fn delete_pool(&self, pool_id: &str) -> RepositoryResult<Vec<String>>;

    /// 停用客户池: 保存标量字段（is_active 置 0）、撤销全部有效分配、清空 assigned_stacks、占用归 0
    ///
    /// 全部写入在同一事务内完成
    ///
    /// # 返回
    /// 被释放的箱位 id 列表
    fn deactivate_pool(&self, pool: &ClientPool) -> RepositoryResult<Vec<String>>;

    fn find_pool(&self, pool_id: &str) -> RepositoryResult<Option<ClientPool>>;

    fn find_active_pool_by_code(&self, client_code: &str) -> RepositoryResult<Option<ClientPool>>;

    fn list_pools(&self, yard_id: Option<&str>) -> RepositoryResult<Vec<ClientPool>>;

    // ===== 分配台账 =====

    /// 条件写入: 仅当箱位不存在与之冲突的有效分配时插入，并同步加入池的 assigned_stacks
    ///
    /// 冲突: 其他池持有有效分配，且新旧任一方为独占分配。
    /// 同一池重复分配为幂等操作。
    /// 实际插入时，occupancy_delta 在同一事务内计入客户池占用。
    fn attach_stack(&self, assignment: &StackAssignment, occupancy_delta: i32)
        -> RepositoryResult<()>;

    /// 撤销分配并同步移出池的 assigned_stacks
    ///
    /// 实际撤销时，occupancy_delta 在同一事务内计入客户池占用。
    ///
    /// # 返回
    /// - Ok(true): 已撤销
    /// - Ok(false): 该池对该箱位无有效分配
    fn detach_stack(&self, pool_id: &str, stack_id: &str, occupancy_delta: i32)
        -> RepositoryResult<bool>;

    /// 原子对账: 撤销 removed 中的箱位，新增 added 中的分配
    ///
    /// occupancy_delta 与台账变更同事务计入客户池占用。
    /// 任一新增分配冲突时整体失败，不写入任何数据
    fn reconcile_stacks(
        &self,
        pool_id: &str,
        removed: &[String],
        added: &[StackAssignment],
        occupancy_delta: i32,
    ) -> RepositoryResult<()>;

    /// 查询箱位的有效分配
    fn find_assignments_by_stack(&self, stack_id: &str) -> RepositoryResult<Vec<StackAssignment>>;

    /// 查询客户池的有效分配
    fn find_assignments_by_pool(&self, pool_id: &str) -> RepositoryResult<Vec<StackAssignment>>;

    /// 所有存在有效分配的箱位 id
    fn assigned_stack_ids(&self) -> RepositoryResult<HashSet<String>>;

    // ===== 占用计数 =====

    /// 原子增量更新客户池占用（结果下限为 0）
    fn apply_pool_occupancy_delta(&self, pool_id: &str, delta: i32) -> RepositoryResult<i32>;

    /// 写入客户池绝对占用（仅限回填迁移后的重算）
    fn set_pool_occupancy(&self, pool_id: &str, occupancy: i32) -> RepositoryResult<()>;
}
