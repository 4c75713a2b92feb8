// ==========================================
// 堆场客户池分配引擎 - 箱位拓扑端口
// ==========================================
// 来源: Stack Topology（外部协作方）
// 说明: 拓扑本身只读；占用计数器是唯一允许写入的字段，且只能做原子增量
// 实现者: SqliteStackTopology / InMemoryStackTopology
// ==========================================

use crate::domain::stack::Stack;
use crate::repository::error::RepositoryResult;

pub trait StackTopology: Send + Sync {
    /// 列出箱位（yard_id 为 None 时返回全部堆场）
    fn list_stacks(&self, yard_id: Option<&str>) -> RepositoryResult<Vec<Stack>>;

    fn find_stack(&self, stack_id: &str) -> RepositoryResult<Option<Stack>>;

    fn find_by_number(&self, yard_id: &str, stack_number: i32) -> RepositoryResult<Option<Stack>>;

    /// 原子增量更新占用（+1 进闸 / -1 出闸），结果下限为 0
    ///
    /// # 返回
    /// 更新后的占用数
    fn apply_occupancy_delta(&self, stack_id: &str, delta: i32) -> RepositoryResult<i32>;

    /// 对多个箱位原子施加同一增量（40ft 进出闸的两个配对成员）
    ///
    /// 任一箱位不存在时整体失败，不写入任何数据
    ///
    /// # 返回
    /// 按输入顺序的 (stack_id, 更新后占用)
    fn apply_occupancy_deltas(
        &self,
        stack_ids: &[String],
        delta: i32,
    ) -> RepositoryResult<Vec<(String, i32)>>;

    /// 写入绝对占用值（仅限一次性回填迁移使用）
    fn backfill_occupancy(&self, stack_id: &str, occupancy: i32) -> RepositoryResult<()>;
}
