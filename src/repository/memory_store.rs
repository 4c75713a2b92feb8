// ==========================================
// 堆场客户池分配引擎 - 内存存储实现
// ==========================================
// 用途: 单元测试与测试夹具；每个实例独立，不共享任何全局状态
// 并发: 单把互斥锁覆盖全部读写，条件写入与对账天然原子
// ==========================================

use crate::domain::assignment::StackAssignment;
use crate::domain::pool::ClientPool;
use crate::domain::stack::Stack;
use crate::repository::allocation_store::AllocationStore;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::stack_topology::StackTopology;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, RwLock};

// ==========================================
// InMemoryAllocationStore
// ==========================================

#[derive(Debug, Clone)]
struct AssignmentRecord {
    assignment: StackAssignment,
    is_active: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    pools: HashMap<String, ClientPool>,
    ledger: Vec<AssignmentRecord>,
}

impl MemoryState {
    fn active_for_stack<'a>(&'a self, stack_id: &'a str) -> impl Iterator<Item = &'a StackAssignment> {
        self.ledger
            .iter()
            .filter(move |r| r.is_active && r.assignment.stack_id == stack_id)
            .map(|r| &r.assignment)
    }

    /// 检查新分配是否与他池有效分配冲突；返回 Ok(true) 表示同池已存在（幂等）
    fn check_attach(&self, assignment: &StackAssignment) -> RepositoryResult<bool> {
        let mut already_owned = false;
        for existing in self.active_for_stack(&assignment.stack_id) {
            if existing.pool_id == assignment.pool_id {
                already_owned = true;
            } else if existing.is_exclusive || assignment.is_exclusive {
                return Err(RepositoryError::ExclusiveAssignmentConflict {
                    stack_id: assignment.stack_id.clone(),
                    owner_pool_id: existing.pool_id.clone(),
                });
            }
        }
        Ok(already_owned)
    }

    fn attach_unchecked(&mut self, assignment: &StackAssignment) -> RepositoryResult<()> {
        let pool = self
            .pools
            .get_mut(&assignment.pool_id)
            .ok_or_else(|| RepositoryError::not_found("ClientPool", &assignment.pool_id))?;
        pool.assigned_stacks.insert(assignment.stack_id.clone());
        self.ledger.push(AssignmentRecord {
            assignment: assignment.clone(),
            is_active: true,
        });
        Ok(())
    }

    fn detach(&mut self, pool_id: &str, stack_id: &str) -> bool {
        let mut revoked = false;
        for record in self.ledger.iter_mut() {
            if record.is_active
                && record.assignment.pool_id == pool_id
                && record.assignment.stack_id == stack_id
            {
                record.is_active = false;
                revoked = true;
            }
        }
        if let Some(pool) = self.pools.get_mut(pool_id) {
            pool.assigned_stacks.remove(stack_id);
        }
        revoked
    }

    /// 撤销池的全部有效分配，返回释放的箱位（含池记录中残留但台账缺失的箱位）
    fn release_all(&mut self, pool_id: &str) -> Vec<String> {
        let mut released = Vec::new();
        for record in self.ledger.iter_mut() {
            if record.is_active && record.assignment.pool_id == pool_id {
                record.is_active = false;
                released.push(record.assignment.stack_id.clone());
            }
        }
        if let Some(pool) = self.pools.get_mut(pool_id) {
            for stack_id in std::mem::take(&mut pool.assigned_stacks) {
                if !released.contains(&stack_id) {
                    released.push(stack_id);
                }
            }
        }
        released.sort();
        released
    }

    fn add_pool_occupancy(&mut self, pool_id: &str, delta: i32) -> RepositoryResult<i32> {
        let pool = self
            .pools
            .get_mut(pool_id)
            .ok_or_else(|| RepositoryError::not_found("ClientPool", pool_id))?;
        pool.current_occupancy = pool.current_occupancy.saturating_add(delta).max(0);
        Ok(pool.current_occupancy)
    }

    fn has_active_pool_for(&self, client_code: &str) -> bool {
        self.pools
            .values()
            .any(|p| p.is_active && p.client_code == client_code)
    }
}

/// 内存版客户池/分配台账存储
#[derive(Debug, Default)]
pub struct InMemoryAllocationStore {
    state: Mutex<MemoryState>,
}

impl InMemoryAllocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> RepositoryResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 测试夹具: 直接改写池的 assigned_stacks（绕过台账，用于制造不一致）
    #[doc(hidden)]
    pub fn overwrite_assigned_stacks_for_test(
        &self,
        pool_id: &str,
        stacks: HashSet<String>,
    ) -> RepositoryResult<()> {
        let mut state = self.lock()?;
        let pool = state
            .pools
            .get_mut(pool_id)
            .ok_or_else(|| RepositoryError::not_found("ClientPool", pool_id))?;
        pool.assigned_stacks = stacks.into_iter().collect();
        Ok(())
    }
}

impl AllocationStore for InMemoryAllocationStore {
    fn create_pool(
        &self,
        pool: &ClientPool,
        assignments: &[StackAssignment],
    ) -> RepositoryResult<()> {
        let mut state = self.lock()?;
        if pool.is_active && state.has_active_pool_for(&pool.client_code) {
            return Err(RepositoryError::ActivePoolExists {
                client_code: pool.client_code.clone(),
            });
        }
        for assignment in assignments {
            state.check_attach(assignment)?;
        }

        let mut stored = pool.clone();
        stored.assigned_stacks.clear();
        state.pools.insert(stored.id.clone(), stored);
        for assignment in assignments {
            state.attach_unchecked(assignment)?;
        }
        Ok(())
    }

    fn save_pool(&self, pool: &ClientPool) -> RepositoryResult<()> {
        let mut state = self.lock()?;
        if pool.is_active
            && state
                .pools
                .values()
                .any(|p| p.id != pool.id && p.is_active && p.client_code == pool.client_code)
        {
            return Err(RepositoryError::ActivePoolExists {
                client_code: pool.client_code.clone(),
            });
        }
        let existing = state
            .pools
            .get_mut(&pool.id)
            .ok_or_else(|| RepositoryError::not_found("ClientPool", &pool.id))?;
        let assigned = std::mem::take(&mut existing.assigned_stacks);
        *existing = pool.clone();
        existing.assigned_stacks = assigned;
        Ok(())
    }

    fn delete_pool(&self, pool_id: &str) -> RepositoryResult<Vec<String>> {
        let mut state = self.lock()?;
        if !state.pools.contains_key(pool_id) {
            return Err(RepositoryError::not_found("ClientPool", pool_id));
        }
        let released = state.release_all(pool_id);
        state.pools.remove(pool_id);
        Ok(released)
    }

    fn deactivate_pool(&self, pool: &ClientPool) -> RepositoryResult<Vec<String>> {
        let mut state = self.lock()?;
        if !state.pools.contains_key(&pool.id) {
            return Err(RepositoryError::not_found("ClientPool", &pool.id));
        }
        let released = state.release_all(&pool.id);

        let mut stored = pool.clone();
        stored.is_active = false;
        stored.assigned_stacks.clear();
        stored.current_occupancy = 0;
        state.pools.insert(stored.id.clone(), stored);
        Ok(released)
    }

    fn find_pool(&self, pool_id: &str) -> RepositoryResult<Option<ClientPool>> {
        Ok(self.lock()?.pools.get(pool_id).cloned())
    }

    fn find_active_pool_by_code(&self, client_code: &str) -> RepositoryResult<Option<ClientPool>> {
        Ok(self
            .lock()?
            .pools
            .values()
            .find(|p| p.is_active && p.client_code == client_code)
            .cloned())
    }

    fn list_pools(&self, yard_id: Option<&str>) -> RepositoryResult<Vec<ClientPool>> {
        let state = self.lock()?;
        let mut pools: Vec<ClientPool> = state
            .pools
            .values()
            .filter(|p| yard_id.map_or(true, |y| p.yard_id == y))
            .cloned()
            .collect();
        pools.sort_by(|a, b| a.client_code.cmp(&b.client_code));
        Ok(pools)
    }

    fn attach_stack(
        &self,
        assignment: &StackAssignment,
        occupancy_delta: i32,
    ) -> RepositoryResult<()> {
        let mut state = self.lock()?;
        if !state.pools.contains_key(&assignment.pool_id) {
            return Err(RepositoryError::not_found("ClientPool", &assignment.pool_id));
        }
        if state.check_attach(assignment)? {
            return Ok(());
        }
        state.attach_unchecked(assignment)?;
        state.add_pool_occupancy(&assignment.pool_id, occupancy_delta)?;
        Ok(())
    }

    fn detach_stack(
        &self,
        pool_id: &str,
        stack_id: &str,
        occupancy_delta: i32,
    ) -> RepositoryResult<bool> {
        let mut state = self.lock()?;
        let revoked = state.detach(pool_id, stack_id);
        if revoked && state.pools.contains_key(pool_id) {
            state.add_pool_occupancy(pool_id, occupancy_delta)?;
        }
        Ok(revoked)
    }

    fn reconcile_stacks(
        &self,
        pool_id: &str,
        removed: &[String],
        added: &[StackAssignment],
        occupancy_delta: i32,
    ) -> RepositoryResult<()> {
        let mut state = self.lock()?;
        if !state.pools.contains_key(pool_id) {
            return Err(RepositoryError::not_found("ClientPool", pool_id));
        }
        for assignment in added {
            state.check_attach(assignment)?;
        }
        for stack_id in removed {
            state.detach(pool_id, stack_id);
        }
        for assignment in added {
            if !state.check_attach(assignment)? {
                state.attach_unchecked(assignment)?;
            }
        }
        state.add_pool_occupancy(pool_id, occupancy_delta)?;
        Ok(())
    }

    fn find_assignments_by_stack(&self, stack_id: &str) -> RepositoryResult<Vec<StackAssignment>> {
        let state = self.lock()?;
        Ok(state.active_for_stack(stack_id).cloned().collect())
    }

    fn find_assignments_by_pool(&self, pool_id: &str) -> RepositoryResult<Vec<StackAssignment>> {
        let state = self.lock()?;
        Ok(state
            .ledger
            .iter()
            .filter(|r| r.is_active && r.assignment.pool_id == pool_id)
            .map(|r| r.assignment.clone())
            .collect())
    }

    fn assigned_stack_ids(&self) -> RepositoryResult<HashSet<String>> {
        let state = self.lock()?;
        Ok(state
            .ledger
            .iter()
            .filter(|r| r.is_active)
            .map(|r| r.assignment.stack_id.clone())
            .collect())
    }

    fn apply_pool_occupancy_delta(&self, pool_id: &str, delta: i32) -> RepositoryResult<i32> {
        self.lock()?.add_pool_occupancy(pool_id, delta)
    }

    fn set_pool_occupancy(&self, pool_id: &str, occupancy: i32) -> RepositoryResult<()> {
        let mut state = self.lock()?;
        let pool = state
            .pools
            .get_mut(pool_id)
            .ok_or_else(|| RepositoryError::not_found("ClientPool", pool_id))?;
        pool.current_occupancy = occupancy.max(0);
        Ok(())
    }
}

// ==========================================
// InMemoryStackTopology
// ==========================================

/// 内存版箱位拓扑
#[derive(Debug, Default)]
pub struct InMemoryStackTopology {
    stacks: RwLock<HashMap<String, Stack>>,
}

impl InMemoryStackTopology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stacks(stacks: Vec<Stack>) -> Self {
        Self {
            stacks: RwLock::new(stacks.into_iter().map(|s| (s.id.clone(), s)).collect()),
        }
    }

    pub fn upsert(&self, stack: Stack) -> RepositoryResult<()> {
        self.stacks
            .write()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?
            .insert(stack.id.clone(), stack);
        Ok(())
    }
}

impl StackTopology for InMemoryStackTopology {
    fn list_stacks(&self, yard_id: Option<&str>) -> RepositoryResult<Vec<Stack>> {
        let stacks = self
            .stacks
            .read()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        let mut result: Vec<Stack> = stacks
            .values()
            .filter(|s| yard_id.map_or(true, |y| s.yard_id == y))
            .cloned()
            .collect();
        result.sort_by(|a, b| (&a.yard_id, a.stack_number).cmp(&(&b.yard_id, b.stack_number)));
        Ok(result)
    }

    fn find_stack(&self, stack_id: &str) -> RepositoryResult<Option<Stack>> {
        let stacks = self
            .stacks
            .read()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        Ok(stacks.get(stack_id).cloned())
    }

    fn find_by_number(&self, yard_id: &str, stack_number: i32) -> RepositoryResult<Option<Stack>> {
        let stacks = self
            .stacks
            .read()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        Ok(stacks
            .values()
            .find(|s| s.yard_id == yard_id && s.stack_number == stack_number)
            .cloned())
    }

    fn apply_occupancy_delta(&self, stack_id: &str, delta: i32) -> RepositoryResult<i32> {
        let mut stacks = self
            .stacks
            .write()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        let stack = stacks
            .get_mut(stack_id)
            .ok_or_else(|| RepositoryError::not_found("Stack", stack_id))?;
        stack.current_occupancy = stack.current_occupancy.saturating_add(delta).max(0);
        Ok(stack.current_occupancy)
    }

    fn apply_occupancy_deltas(
        &self,
        stack_ids: &[String],
        delta: i32,
    ) -> RepositoryResult<Vec<(String, i32)>> {
        let mut stacks = self
            .stacks
            .write()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        if let Some(missing) = stack_ids.iter().find(|id| !stacks.contains_key(*id)) {
            return Err(RepositoryError::not_found("Stack", missing));
        }
        let mut updated = Vec::with_capacity(stack_ids.len());
        for stack_id in stack_ids {
            if let Some(stack) = stacks.get_mut(stack_id) {
                stack.current_occupancy = stack.current_occupancy.saturating_add(delta).max(0);
                updated.push((stack_id.clone(), stack.current_occupancy));
            }
        }
        Ok(updated)
    }

    fn backfill_occupancy(&self, stack_id: &str, occupancy: i32) -> RepositoryResult<()> {
        let mut stacks = self
            .stacks
            .write()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        let stack = stacks
            .get_mut(stack_id)
            .ok_or_else(|| RepositoryError::not_found("Stack", stack_id))?;
        stack.current_occupancy = occupancy.max(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pool::ContractWindow;
    use crate::domain::stack::YardPosition;
    use crate::domain::types::{ContainerSize, PoolPriority};
    use chrono::{Local, NaiveDate};
    use std::collections::BTreeSet;

    fn pool(id: &str, code: &str) -> ClientPool {
        let now = Local::now().naive_local();
        ClientPool {
            id: id.to_string(),
            client_id: format!("C-{}", code),
            client_code: code.to_string(),
            client_name: format!("Client {}", code),
            yard_id: "Y1".to_string(),
            assigned_stacks: BTreeSet::new(),
            max_capacity: 100,
            current_occupancy: 0,
            priority: PoolPriority::Medium,
            contract: ContractWindow::open_ended(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()),
            is_active: true,
            notes: None,
            created_at: now,
            updated_at: now,
            created_by: "tester".to_string(),
            updated_by: "tester".to_string(),
        }
    }

    fn assignment(stack_id: &str, pool_id: &str, code: &str) -> StackAssignment {
        StackAssignment {
            id: uuid::Uuid::new_v4().to_string(),
            stack_id: stack_id.to_string(),
            stack_number: 3,
            pool_id: pool_id.to_string(),
            client_code: code.to_string(),
            is_exclusive: true,
            priority: PoolPriority::Medium,
            assigned_at: Local::now().naive_local(),
            assigned_by: "tester".to_string(),
        }
    }

    fn stack(number: i32, occupancy: i32) -> Stack {
        Stack {
            id: format!("s{}", number),
            yard_id: "Y1".to_string(),
            stack_number: number,
            section_id: "SEC-A".to_string(),
            rows: 6,
            max_tiers: 5,
            position: Some(YardPosition { x: number, y: 0 }),
            container_size_capability: ContainerSize::Feet40,
            is_special_stack: false,
            is_virtual: false,
            current_occupancy: occupancy,
        }
    }

    #[test]
    fn test_deactivate_pool_releases_stacks() {
        let store = InMemoryAllocationStore::new();
        let mut p1 = pool("P1", "ACME");
        p1.current_occupancy = 4;
        store
            .create_pool(
                &p1,
                &[assignment("s5", "P1", "ACME"), assignment("s3", "P1", "ACME")],
            )
            .unwrap();

        p1.notes = Some("合同到期".to_string());
        let released = store.deactivate_pool(&p1).unwrap();
        assert_eq!(released, vec!["s3".to_string(), "s5".to_string()]);

        let stored = store.find_pool("P1").unwrap().unwrap();
        assert!(!stored.is_active);
        assert!(stored.assigned_stacks.is_empty());
        assert_eq!(stored.current_occupancy, 0);
        assert_eq!(stored.notes.as_deref(), Some("合同到期"));
        assert!(store.assigned_stack_ids().unwrap().is_empty());

        store.create_pool(&pool("P2", "GLOBEX"), &[]).unwrap();
        store.attach_stack(&assignment("s3", "P2", "GLOBEX"), 0).unwrap();
        store.create_pool(&pool("P3", "ACME"), &[]).unwrap();

        assert!(matches!(
            store.deactivate_pool(&pool("missing", "NOBODY")),
            Err(RepositoryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_ledger_writes_carry_pool_occupancy_delta() {
        let store = InMemoryAllocationStore::new();
        store.create_pool(&pool("P1", "ACME"), &[]).unwrap();

        store.attach_stack(&assignment("s7", "P1", "ACME"), 10).unwrap();
        store.attach_stack(&assignment("s7", "P1", "ACME"), 10).unwrap();
        assert_eq!(store.find_pool("P1").unwrap().unwrap().current_occupancy, 10);

        store
            .reconcile_stacks("P1", &[], &[assignment("s9", "P1", "ACME")], 3)
            .unwrap();
        assert_eq!(store.find_pool("P1").unwrap().unwrap().current_occupancy, 13);

        assert!(store.detach_stack("P1", "s7", -10).unwrap());
        assert!(!store.detach_stack("P1", "s7", -10).unwrap());
        assert_eq!(store.find_pool("P1").unwrap().unwrap().current_occupancy, 3);
    }

    #[test]
    fn test_reconcile_conflict_leaves_occupancy_untouched() {
        let store = InMemoryAllocationStore::new();
        store
            .create_pool(&pool("P1", "ACME"), &[assignment("s3", "P1", "ACME")])
            .unwrap();
        store
            .create_pool(&pool("P2", "GLOBEX"), &[assignment("s9", "P2", "GLOBEX")])
            .unwrap();

        let err = store
            .reconcile_stacks(
                "P1",
                &["s3".to_string()],
                &[assignment("s9", "P1", "ACME")],
                4,
            )
            .unwrap_err();
        assert!(matches!(err, RepositoryError::ExclusiveAssignmentConflict { .. }));

        let p1 = store.find_pool("P1").unwrap().unwrap();
        assert!(p1.assigned_stacks.contains("s3"));
        assert_eq!(p1.current_occupancy, 0);
    }

    #[test]
    fn test_member_deltas_are_all_or_nothing() {
        let topology = InMemoryStackTopology::with_stacks(vec![stack(3, 2), stack(5, 0)]);

        let err = topology
            .apply_occupancy_deltas(&["s3".to_string(), "s99".to_string()], 1)
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { .. }));
        assert_eq!(topology.find_stack("s3").unwrap().unwrap().current_occupancy, 2);

        let updated = topology
            .apply_occupancy_deltas(&["s3".to_string(), "s5".to_string()], -1)
            .unwrap();
        assert_eq!(updated, vec![("s3".to_string(), 1), ("s5".to_string(), 0)]);
    }
}
