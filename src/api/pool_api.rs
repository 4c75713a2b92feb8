// ==========================================
// 堆场客户池分配引擎 - 客户池与分配台账 API
// ==========================================
// 职责: 客户池增删改查、箱位分配/撤销/批量分配、统计、台账核对
// 红线: 独占归属由存储边界的条件写入保证；冲突不自动重试
// 红线: 台账不一致只报告，不自动修复
// ==========================================

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::Local;
use tracing::instrument;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::config::{AllocationConfig, OccupiedReleasePolicy};
use crate::domain::assignment::{
    AssignStackRequest, BulkAssignResult, BulkItemFailure, StackAssignment,
};
use crate::domain::pool::{ClientPool, CreatePoolRequest, PoolStats, PoolUpdate};
use crate::domain::stack::Stack;
use crate::domain::types::PoolPriority;
use crate::engine::CapacityCalculator;
use crate::repository::{with_retry, AllocationStore, RepositoryResult, StackTopology};

// ==========================================
// PoolApi - 客户池 API
// ==========================================

/// 客户池与分配台账API
///
/// 职责：
/// 1. 客户池生命周期（创建、更新对账、删除释放）
/// 2. 单个/批量箱位分配与撤销
/// 3. 统计与台账核对
pub struct PoolApi {
    store: Arc<dyn AllocationStore>,
    topology: Arc<dyn StackTopology>,
    config: AllocationConfig,
    calculator: CapacityCalculator,
}

impl PoolApi {
    /// 创建新的PoolApi实例
    pub fn new(
        store: Arc<dyn AllocationStore>,
        topology: Arc<dyn StackTopology>,
        config: AllocationConfig,
    ) -> Self {
        Self {
            store,
            topology,
            config,
            calculator: CapacityCalculator::new(),
        }
    }

    /// 存储调用（瞬时错误退避重试）
    fn call<T, F>(&self, operation: &str, f: F) -> ApiResult<T>
    where
        F: FnMut() -> RepositoryResult<T>,
    {
        with_retry(&self.config.retry, operation, f).map_err(ApiError::from)
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 列出客户池
    ///
    /// # 参数
    /// - yard_id: 堆场ID（None 表示全部堆场）
    pub fn list_pools(&self, yard_id: Option<&str>) -> ApiResult<Vec<ClientPool>> {
        self.call("list_pools", || self.store.list_pools(yard_id))
    }

    /// 按客户代码查询有效客户池
    ///
    /// # 返回
    /// - Ok(Some(pool)): 有效客户池
    /// - Ok(None): 客户没有有效客户池
    pub fn get_pool(&self, client_code: &str) -> ApiResult<Option<ClientPool>> {
        if client_code.trim().is_empty() {
            return Err(ApiError::ValidationError("客户代码不能为空".to_string()));
        }
        self.call("get_pool", || self.store.find_active_pool_by_code(client_code))
    }

    fn require_pool(&self, client_code: &str) -> ApiResult<ClientPool> {
        self.get_pool(client_code)?
            .ok_or_else(|| ApiError::NotFound(format!("客户{}没有有效客户池", client_code)))
    }

    fn require_pool_by_id(&self, pool_id: &str) -> ApiResult<ClientPool> {
        self.call("find_pool", || self.store.find_pool(pool_id))?
            .ok_or_else(|| ApiError::NotFound(format!("ClientPool(id={})不存在", pool_id)))
    }

    // ==========================================
    // 客户池生命周期
    // ==========================================

    /// 创建客户池，并为每个初始箱位建立独占分配
    ///
    /// # 返回
    /// - Err(Conflict): 客户已有有效客户池，或初始箱位已被其他池独占
    #[instrument(skip(self, request), fields(client_code = %request.client_code))]
    pub fn create_pool(&self, request: CreatePoolRequest) -> ApiResult<ClientPool> {
        if request.client_code.trim().is_empty() {
            return Err(ApiError::ValidationError("客户代码不能为空".to_string()));
        }
        if request.yard_id.trim().is_empty() {
            return Err(ApiError::ValidationError("堆场ID不能为空".to_string()));
        }
        if !request.contract.is_well_formed() {
            return Err(ApiError::ValidationError(format!(
                "合同期无效: start={}, end={:?}",
                request.contract.start, request.contract.end
            )));
        }
        if let Some(max) = request.max_capacity {
            if max < 0 {
                return Err(ApiError::ValidationError(format!("最大容量不能为负: {}", max)));
            }
        }

        let stack_ids: BTreeSet<String> = request.initial_stacks.iter().cloned().collect();
        let stacks = self.load_physical_stacks(&stack_ids, &request.yard_id)?;

        let now = Local::now().naive_local();
        let pool = ClientPool {
            id: Uuid::new_v4().to_string(),
            client_id: request.client_id,
            client_code: request.client_code,
            client_name: request.client_name,
            yard_id: request.yard_id,
            assigned_stacks: stack_ids,
            max_capacity: request
                .max_capacity
                .unwrap_or_else(|| self.calculator.total_effective_capacity(&stacks)),
            current_occupancy: self.calculator.effective_occupancy(&stacks),
            priority: request.priority,
            contract: request.contract,
            is_active: true,
            notes: request.notes,
            created_at: now,
            updated_at: now,
            created_by: request.operator.clone(),
            updated_by: request.operator.clone(),
        };

        let assignments: Vec<StackAssignment> = stacks
            .iter()
            .map(|s| new_assignment(s, &pool, true, pool.priority, &request.operator))
            .collect();

        self.call("create_pool", || self.store.create_pool(&pool, &assignments))
            .map_err(|e| {
                if let ApiError::Conflict(ref msg) = e {
                    tracing::warn!(client_code = %pool.client_code, reason = %msg, "创建客户池冲突");
                }
                e
            })?;

        tracing::info!(
            pool_id = %pool.id,
            client_code = %pool.client_code,
            stacks = pool.assigned_stacks.len(),
            max_capacity = pool.max_capacity,
            "客户池已创建"
        );
        Ok(pool)
    }

    /// 更新客户池
    ///
    /// assigned_stacks 变化时按新旧集合差异对账: 移出的箱位撤销分配，新增的箱位建立独占分配，
    /// 客户池占用随之增减。未显式给出 max_capacity 时按新箱位集合重新计算。
    /// is_active 由 true 改为 false 时停用客户池并释放全部箱位（受释放策略约束）。
    ///
    /// # 参数
    /// - client_code: 客户代码
    /// - update: 更新字段（None 表示不变）
    /// - operator: 操作人
    #[instrument(skip(self, update))]
    pub fn update_pool(
        &self,
        client_code: &str,
        update: PoolUpdate,
        operator: &str,
    ) -> ApiResult<ClientPool> {
        let mut pool = self.require_pool(client_code)?;

        if let Some(contract) = &update.contract {
            if !contract.is_well_formed() {
                return Err(ApiError::ValidationError(format!(
                    "合同期无效: start={}, end={:?}",
                    contract.start, contract.end
                )));
            }
        }
        if let Some(max) = update.max_capacity {
            if max < 0 {
                return Err(ApiError::ValidationError(format!("最大容量不能为负: {}", max)));
            }
        }

        let deactivating = pool.is_active && update.is_active == Some(false);
        if deactivating {
            if update.assigned_stacks.is_some() {
                return Err(ApiError::ValidationError(
                    "停用客户池时不能同时调整箱位".to_string(),
                ));
            }
            for stack_id in &self.held_stack_ids(&pool)? {
                self.check_release_allowed(stack_id)?;
            }
        }

        if let Some(new_set) = &update.assigned_stacks {
            let removed: Vec<String> = pool.assigned_stacks.difference(new_set).cloned().collect();
            let added_ids: BTreeSet<String> =
                new_set.difference(&pool.assigned_stacks).cloned().collect();

            let added_stacks = self.load_physical_stacks(&added_ids, &pool.yard_id)?;
            for stack_id in &removed {
                self.check_release_allowed(stack_id)?;
            }

            let priority = update.priority.unwrap_or(pool.priority);
            let added: Vec<StackAssignment> = added_stacks
                .iter()
                .map(|s| new_assignment(s, &pool, true, priority, operator))
                .collect();

            if !removed.is_empty() || !added.is_empty() {
                let before = self.exclusive_member_stacks(&pool.id)?;
                let mut after: Vec<Stack> = before
                    .iter()
                    .filter(|s| !removed.contains(&s.id))
                    .cloned()
                    .collect();
                after.extend(added_stacks.iter().cloned());
                let occupancy_delta = self.occupancy_delta(&before, &after);

                self.call("reconcile_stacks", || {
                    self.store
                        .reconcile_stacks(&pool.id, &removed, &added, occupancy_delta)
                })?;
                tracing::info!(
                    pool_id = %pool.id,
                    removed = ?removed,
                    added = ?added_ids,
                    occupancy_delta,
                    "客户池箱位已对账"
                );
            }
            pool.assigned_stacks = new_set.clone();

            if update.max_capacity.is_none() {
                let stacks = self.load_physical_stacks(new_set, &pool.yard_id)?;
                pool.max_capacity = self.calculator.total_effective_capacity(&stacks);
            }
        }

        if let Some(name) = update.client_name {
            pool.client_name = name;
        }
        if let Some(max) = update.max_capacity {
            pool.max_capacity = max;
        }
        if let Some(priority) = update.priority {
            pool.priority = priority;
        }
        if let Some(contract) = update.contract {
            pool.contract = contract;
        }
        if let Some(is_active) = update.is_active {
            pool.is_active = is_active;
        }
        if update.notes.is_some() {
            pool.notes = update.notes;
        }
        pool.updated_at = Local::now().naive_local();
        pool.updated_by = operator.to_string();

        if deactivating {
            let released = self.call("deactivate_pool", || self.store.deactivate_pool(&pool))?;
            tracing::info!(
                pool_id = %pool.id,
                client_code = %pool.client_code,
                released = ?released,
                "客户池已停用，箱位已释放"
            );
        } else {
            self.call("save_pool", || self.store.save_pool(&pool))?;
        }

        let saved = self.require_pool_by_id(&pool.id)?;
        tracing::info!(pool_id = %saved.id, client_code = %saved.client_code, "客户池已更新");
        Ok(saved)
    }

    /// 删除客户池，释放全部箱位
    ///
    /// # 返回
    /// - Ok(Vec<String>): 被释放的箱位ID
    /// - Err(ValidationError): 释放策略为 Block 且仍有箱位被占用
    #[instrument(skip(self))]
    pub fn delete_pool(&self, pool_id: &str) -> ApiResult<Vec<String>> {
        let pool = self.require_pool_by_id(pool_id)?;
        for stack_id in &self.held_stack_ids(&pool)? {
            self.check_release_allowed(stack_id)?;
        }

        let released = self.call("delete_pool", || self.store.delete_pool(pool_id))?;
        tracing::info!(
            pool_id = %pool_id,
            client_code = %pool.client_code,
            released = released.len(),
            "客户池已删除，箱位已释放"
        );
        Ok(released)
    }

    // ==========================================
    // 箱位分配
    // ==========================================

    /// 分配箱位
    ///
    /// # 返回
    /// - Ok(StackAssignment): 有效分配（同池重复分配返回已有记录）
    /// - Err(Conflict): 箱位已被其他池独占（调用方决定是否重试）
    #[instrument(skip(self, request), fields(stack_id = %request.stack_id, pool_id = %request.pool_id))]
    pub fn assign_stack(&self, request: AssignStackRequest) -> ApiResult<StackAssignment> {
        let stack = self.require_stack(&request.stack_id)?;
        if stack.is_virtual_identity() {
            return Err(ApiError::ValidationError(format!(
                "虚拟箱位S{:02}不能单独分配",
                stack.stack_number
            )));
        }
        if stack.stack_number != request.stack_number {
            return Err(ApiError::ValidationError(format!(
                "箱位编号不匹配: stack_id={}, 请求编号={}, 实际编号={}",
                stack.id, request.stack_number, stack.stack_number
            )));
        }

        let pool = self.require_pool_by_id(&request.pool_id)?;
        if !pool.is_active {
            return Err(ApiError::ValidationError(format!("客户池{}已停用", pool.id)));
        }
        if pool.client_code != request.client_code {
            return Err(ApiError::ValidationError(format!(
                "客户代码与客户池不符: 请求={}, 客户池={}",
                request.client_code, pool.client_code
            )));
        }
        if pool.yard_id != stack.yard_id {
            return Err(ApiError::ValidationError(format!(
                "箱位{}不在客户池所属堆场{}",
                stack.id, pool.yard_id
            )));
        }

        let assignment = new_assignment(
            &stack,
            &pool,
            request.is_exclusive,
            request.priority,
            &request.operator,
        );

        // 独占分配带来的占用计入客户池；共享分配不计
        let occupancy_delta = if assignment.is_exclusive {
            let before = self.exclusive_member_stacks(&pool.id)?;
            if before.iter().any(|s| s.id == stack.id) {
                0
            } else {
                let mut after = before.clone();
                after.push(stack.clone());
                self.occupancy_delta(&before, &after)
            }
        } else {
            0
        };

        if let Err(e) = self.call("attach_stack", || {
            self.store.attach_stack(&assignment, occupancy_delta)
        }) {
            if let ApiError::Conflict(ref msg) = e {
                tracing::warn!(stack_id = %stack.id, pool_id = %pool.id, reason = %msg, "箱位分配冲突");
            }
            return Err(e);
        }

        let active = self.call("find_assignments_by_stack", || {
            self.store.find_assignments_by_stack(&stack.id)
        })?;
        let stored = active
            .into_iter()
            .find(|a| a.pool_id == pool.id)
            .ok_or_else(|| {
                tracing::error!(stack_id = %stack.id, pool_id = %pool.id, "分配写入后台账中无记录");
                ApiError::IntegrityError(format!(
                    "箱位{}分配后台账无有效记录: pool_id={}",
                    stack.id, pool.id
                ))
            })?;

        tracing::info!(stack_id = %stack.id, pool_id = %pool.id, exclusive = stored.is_exclusive, "箱位已分配");
        Ok(stored)
    }

    /// 从客户池移出箱位
    ///
    /// # 返回
    /// - Ok(true): 已撤销
    /// - Ok(false): 客户池对该箱位没有有效分配
    #[instrument(skip(self))]
    pub fn remove_stack(&self, stack_id: &str, client_code: &str) -> ApiResult<bool> {
        let pool = self.require_pool(client_code)?;
        if !pool.owns(stack_id) {
            let ledger = self.call("find_assignments_by_stack", || {
                self.store.find_assignments_by_stack(stack_id)
            })?;
            if !ledger.iter().any(|a| a.pool_id == pool.id) {
                return Ok(false);
            }
        }
        self.check_release_allowed(stack_id)?;

        let before = self.exclusive_member_stacks(&pool.id)?;
        let after: Vec<Stack> = before.iter().filter(|s| s.id != stack_id).cloned().collect();
        let occupancy_delta = self.occupancy_delta(&before, &after);

        let revoked = self.call("detach_stack", || {
            self.store.detach_stack(&pool.id, stack_id, occupancy_delta)
        })?;
        if revoked {
            tracing::info!(stack_id = %stack_id, pool_id = %pool.id, "箱位已移出客户池");
        }
        Ok(revoked)
    }

    /// 批量分配箱位（逐项独立，单项失败记录后跳过）
    ///
    /// # 返回
    /// 逐项成功/失败清单；整体不因单项失败而中止
    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub fn bulk_assign_stacks(&self, requests: Vec<AssignStackRequest>) -> BulkAssignResult {
        let mut result = BulkAssignResult::default();
        for request in requests {
            let stack_id = request.stack_id.clone();
            match self.assign_stack(request) {
                Ok(_) => result.succeeded.push(stack_id),
                Err(e) => {
                    tracing::warn!(stack_id = %stack_id, error = %e, "批量分配单项失败，已跳过");
                    result.failed.push(BulkItemFailure {
                        stack_id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        tracing::info!(
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            "批量分配完成"
        );
        result
    }

    // ==========================================
    // 统计与核对
    // ==========================================

    /// 客户池统计
    ///
    /// # 参数
    /// - yard_id: 堆场ID（None 表示全部堆场）
    pub fn get_pool_stats(&self, yard_id: Option<&str>) -> ApiResult<PoolStats> {
        let pools = self.list_pools(yard_id)?;
        let stacks = self.call("list_stacks", || self.topology.list_stacks(yard_id))?;
        let assigned = self.call("assigned_stack_ids", || self.store.assigned_stack_ids())?;

        let active: Vec<&ClientPool> = pools.iter().filter(|p| p.is_active).collect();
        let active_clients: HashSet<&str> = active.iter().map(|p| p.client_code.as_str()).collect();

        let physical: Vec<&Stack> = stacks.iter().filter(|s| !s.is_virtual_identity()).collect();
        let total_assigned_stacks = physical.iter().filter(|s| assigned.contains(&s.id)).count();

        let average_occupancy_percent = if active.is_empty() {
            0.0
        } else {
            active.iter().map(|p| p.occupancy_percent()).sum::<f64>() / active.len() as f64
        };

        Ok(PoolStats {
            total_pools: pools.len(),
            active_clients: active_clients.len(),
            total_assigned_stacks,
            average_occupancy_percent,
            unassigned_stacks: physical.len() - total_assigned_stacks,
        })
    }

    /// 核对客户池记录与分配台账
    ///
    /// # 返回
    /// - Ok(()): 一致
    /// - Err(IntegrityError): 不一致（只报告，不修复）
    #[instrument(skip(self))]
    pub fn verify_pool_integrity(&self, client_code: &str) -> ApiResult<()> {
        let pool = self.require_pool(client_code)?;
        let ledger = self.call("find_assignments_by_pool", || {
            self.store.find_assignments_by_pool(&pool.id)
        })?;
        let ledger_ids: BTreeSet<String> = ledger.into_iter().map(|a| a.stack_id).collect();

        if ledger_ids == pool.assigned_stacks {
            return Ok(());
        }

        let missing_in_ledger: Vec<&String> = pool.assigned_stacks.difference(&ledger_ids).collect();
        let missing_in_pool: Vec<&String> = ledger_ids.difference(&pool.assigned_stacks).collect();
        tracing::error!(
            pool_id = %pool.id,
            client_code = %pool.client_code,
            missing_in_ledger = ?missing_in_ledger,
            missing_in_pool = ?missing_in_pool,
            "客户池记录与分配台账不一致"
        );
        Err(ApiError::IntegrityError(format!(
            "客户池{}: 台账缺失{:?}, 池记录缺失{:?}",
            pool.client_code, missing_in_ledger, missing_in_pool
        )))
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    fn require_stack(&self, stack_id: &str) -> ApiResult<Stack> {
        self.call("find_stack", || self.topology.find_stack(stack_id))?
            .ok_or_else(|| ApiError::NotFound(format!("Stack(id={})不存在", stack_id)))
    }

    /// 加载物理箱位，并校验其属于指定堆场且不是虚拟身份
    fn load_physical_stacks(
        &self,
        stack_ids: &BTreeSet<String>,
        yard_id: &str,
    ) -> ApiResult<Vec<Stack>> {
        let mut stacks = Vec::with_capacity(stack_ids.len());
        for stack_id in stack_ids {
            let stack = self.require_stack(stack_id)?;
            if stack.is_virtual_identity() {
                return Err(ApiError::ValidationError(format!(
                    "虚拟箱位S{:02}不能加入客户池",
                    stack.stack_number
                )));
            }
            if stack.yard_id != yard_id {
                return Err(ApiError::ValidationError(format!(
                    "箱位{}属于堆场{}，不是{}",
                    stack.id, stack.yard_id, yard_id
                )));
            }
            stacks.push(stack);
        }
        Ok(stacks)
    }

    /// 客户池持有的箱位（池记录与台账的并集）
    fn held_stack_ids(&self, pool: &ClientPool) -> ApiResult<BTreeSet<String>> {
        let ledger = self.call("find_assignments_by_pool", || {
            self.store.find_assignments_by_pool(&pool.id)
        })?;
        let mut held = pool.assigned_stacks.clone();
        held.extend(ledger.into_iter().map(|a| a.stack_id));
        Ok(held)
    }

    /// 客户池按台账独占持有的物理箱位
    fn exclusive_member_stacks(&self, pool_id: &str) -> ApiResult<Vec<Stack>> {
        let ledger = self.call("find_assignments_by_pool", || {
            self.store.find_assignments_by_pool(pool_id)
        })?;
        let mut stacks = Vec::with_capacity(ledger.len());
        for assignment in ledger.iter().filter(|a| a.is_exclusive) {
            if let Some(stack) =
                self.call("find_stack", || self.topology.find_stack(&assignment.stack_id))?
            {
                stacks.push(stack);
            }
        }
        Ok(stacks)
    }

    /// 箱位集合由 before 变为 after 时客户池占用的增量（配对只计一次）
    fn occupancy_delta(&self, before: &[Stack], after: &[Stack]) -> i32 {
        self.calculator
            .effective_occupancy(after)
            .saturating_sub(self.calculator.effective_occupancy(before))
    }

    /// 按释放策略检查箱位能否释放
    fn check_release_allowed(&self, stack_id: &str) -> ApiResult<()> {
        let occupancy = match self.call("find_stack", || self.topology.find_stack(stack_id))? {
            Some(stack) => stack.current_occupancy,
            None => return Ok(()),
        };
        if occupancy <= 0 {
            return Ok(());
        }
        match self.config.occupied_release_policy {
            OccupiedReleasePolicy::Block => Err(ApiError::ValidationError(format!(
                "箱位{}仍有{}个集装箱，不能释放",
                stack_id, occupancy
            ))),
            OccupiedReleasePolicy::Release => {
                tracing::warn!(stack_id = %stack_id, occupancy, "释放仍被占用的箱位");
                Ok(())
            }
        }
    }
}

fn new_assignment(
    stack: &Stack,
    pool: &ClientPool,
    is_exclusive: bool,
    priority: PoolPriority,
    operator: &str,
) -> StackAssignment {
    StackAssignment {
        id: Uuid::new_v4().to_string(),
        stack_id: stack.id.clone(),
        stack_number: stack.stack_number,
        pool_id: pool.id.clone(),
        client_code: pool.client_code.clone(),
        is_exclusive,
        priority,
        assigned_at: Local::now().naive_local(),
        assigned_by: operator.to_string(),
    }
}
