// ==========================================
// 堆场客户池分配引擎 - 落箱 API
// ==========================================
// 职责: 可用箱位查询、落箱校验、进出闸占用增量
// 红线: 查询与校验只读；占用只做原子增量（+1/-1），不做读后覆盖
// 红线: 40ft 箱在虚拟箱位上的进出闸同时作用于两个物理成员
// ==========================================

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::error::{ApiError, ApiResult};
use crate::config::AllocationConfig;
use crate::domain::assignment::StackAssignment;
use crate::domain::location::LocationId;
use crate::domain::stack::Stack;
use crate::domain::types::ContainerSize;
use crate::engine::availability::{AvailabilityResolver, PositionSlot, StackCandidate};
use crate::engine::pairing;
use crate::engine::placement_validator::{
    PlacementContext, PlacementRejection, PlacementRequest, PlacementValidation,
    PlacementValidator,
};
use crate::repository::{with_retry, AllocationStore, RepositoryResult, StackTopology};

/// 进出闸后的占用结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyChange {
    pub location_id: String,
    pub stack_number: i32,
    /// (stack_id, 更新后占用)
    pub members: Vec<(String, i32)>,
    /// (pool_id, 更新后占用)；只计独占持有成员箱位的客户池，每个池计一次
    pub pools: Vec<(String, i32)>,
}

// ==========================================
// PlacementApi - 落箱 API
// ==========================================
pub struct PlacementApi {
    store: Arc<dyn AllocationStore>,
    topology: Arc<dyn StackTopology>,
    config: AllocationConfig,
    resolver: AvailabilityResolver,
    validator: PlacementValidator,
}

impl PlacementApi {
    /// 创建新的PlacementApi实例
    pub fn new(
        store: Arc<dyn AllocationStore>,
        topology: Arc<dyn StackTopology>,
        config: AllocationConfig,
    ) -> Self {
        Self {
            store,
            topology,
            resolver: AvailabilityResolver::new(config.clone()),
            validator: PlacementValidator::new(),
            config,
        }
    }

    fn call<T, F>(&self, operation: &str, f: F) -> ApiResult<T>
    where
        F: FnMut() -> RepositoryResult<T>,
    {
        with_retry(&self.config.retry, operation, f).map_err(ApiError::from)
    }

    // ==========================================
    // 可用箱位
    // ==========================================

    /// 查询可用箱位（已排序）
    ///
    /// 客户有有效客户池时从池内箱位中选取；否则从无任何有效分配的箱位中选取。
    ///
    /// # 参数
    /// - client_code: 客户代码
    /// - container_size: 箱型
    /// - yard_id: 堆场ID
    #[instrument(skip(self))]
    pub fn get_available_stacks(
        &self,
        client_code: &str,
        container_size: ContainerSize,
        yard_id: &str,
    ) -> ApiResult<Vec<StackCandidate>> {
        if client_code.trim().is_empty() {
            return Err(ApiError::ValidationError("客户代码不能为空".to_string()));
        }
        if yard_id.trim().is_empty() {
            return Err(ApiError::ValidationError("堆场ID不能为空".to_string()));
        }

        let pool = self.call("find_active_pool_by_code", || {
            self.store.find_active_pool_by_code(client_code)
        })?;
        let yard_stacks = self.call("list_stacks", || self.topology.list_stacks(Some(yard_id)))?;

        let universe = match &pool {
            Some(pool) => AvailabilityResolver::candidate_universe(
                Some(pool),
                &yard_stacks,
                &Default::default(),
            ),
            None => {
                let assigned = self.call("assigned_stack_ids", || self.store.assigned_stack_ids())?;
                tracing::debug!(client_code, "客户无有效客户池，使用未分配箱位");
                AvailabilityResolver::candidate_universe(None, &yard_stacks, &assigned)
            }
        };

        let candidates = self.resolver.resolve(&universe, container_size);
        tracing::info!(
            client_code,
            pooled = pool.is_some(),
            candidates = candidates.len(),
            "可用箱位查询完成"
        );
        Ok(candidates)
    }

    /// 查询可用单元位置（S{nn}R{r}H{h}），顺序与箱位排序一致
    pub fn get_available_positions(
        &self,
        client_code: &str,
        container_size: ContainerSize,
        yard_id: &str,
    ) -> ApiResult<Vec<PositionSlot>> {
        let candidates = self.get_available_stacks(client_code, container_size, yard_id)?;
        let mut slots = Vec::new();
        for candidate in &candidates {
            slots.extend(AvailabilityResolver::expand_positions(candidate)?);
        }
        Ok(slots)
    }

    // ==========================================
    // 落箱校验
    // ==========================================

    /// 校验落箱
    ///
    /// # 参数
    /// - request: 落箱请求
    /// - target_stack_number: 目标箱位编号（40ft 为虚拟箱位编号）
    ///
    /// # 返回
    /// - Ok(validation): is_valid=false 时 rejection 为 AccessDenied / InvalidPlacement
    /// - Err(IntegrityError): 台账缺失
    /// - Err(NotFound): 目标箱位不存在
    #[instrument(skip(self, request), fields(client_code = %request.client_code))]
    pub fn validate_assignment(
        &self,
        request: &PlacementRequest,
        target_stack_number: i32,
    ) -> ApiResult<PlacementValidation> {
        let pool = self.call("find_active_pool_by_code", || {
            self.store.find_active_pool_by_code(&request.client_code)
        })?;

        let mut members = Vec::new();
        let mut active_assignments: HashMap<String, Vec<StackAssignment>> = HashMap::new();
        if pool.is_some() {
            members = self.load_members(&request.yard_id, target_stack_number)?;
            for member in &members {
                let list = self.call("find_assignments_by_stack", || {
                    self.store.find_assignments_by_stack(&member.id)
                })?;
                active_assignments.insert(member.id.clone(), list);
            }
        }

        let ctx = PlacementContext {
            pool: pool.as_ref(),
            members: &members,
            active_assignments: &active_assignments,
        };
        let validation = self.validator.validate(request, target_stack_number, ctx)?;
        if !validation.is_valid {
            tracing::info!(
                target_stack_number,
                reason = %validation.reason,
                "落箱校验未通过"
            );
        }
        Ok(validation)
    }

    /// 校验落箱，未通过时转为错误
    pub fn ensure_assignment(
        &self,
        request: &PlacementRequest,
        target_stack_number: i32,
    ) -> ApiResult<()> {
        let validation = self.validate_assignment(request, target_stack_number)?;
        match validation.rejection {
            None => Ok(()),
            Some(PlacementRejection::AccessDenied) => Err(ApiError::AccessDenied(validation.reason)),
            Some(PlacementRejection::InvalidPlacement) => {
                Err(ApiError::InvalidPlacement(validation.reason))
            }
        }
    }

    // ==========================================
    // 进出闸占用增量
    // ==========================================

    /// 进闸: 目标位置所在箱位占用 +1
    pub fn gate_in(
        &self,
        yard_id: &str,
        location_id: &str,
        container_size: ContainerSize,
    ) -> ApiResult<OccupancyChange> {
        self.apply_gate_event(yard_id, location_id, container_size, 1)
    }

    /// 出闸: 目标位置所在箱位占用 -1（下限 0）
    pub fn gate_out(
        &self,
        yard_id: &str,
        location_id: &str,
        container_size: ContainerSize,
    ) -> ApiResult<OccupancyChange> {
        self.apply_gate_event(yard_id, location_id, container_size, -1)
    }

    #[instrument(skip(self))]
    fn apply_gate_event(
        &self,
        yard_id: &str,
        location_id: &str,
        container_size: ContainerSize,
        delta: i32,
    ) -> ApiResult<OccupancyChange> {
        let location = LocationId::parse(location_id)?;
        let stack_number = location.stack_number;

        let is_virtual = pairing::is_valid_virtual(stack_number);
        match container_size {
            ContainerSize::Feet40 if !is_virtual => {
                return Err(ApiError::InvalidPlacement(format!(
                    "40ft 箱位置必须位于虚拟箱位: {}",
                    location_id
                )));
            }
            ContainerSize::Feet20 if is_virtual => {
                return Err(ApiError::InvalidPlacement(format!(
                    "20ft 箱位置不能位于虚拟箱位: {}",
                    location_id
                )));
            }
            _ => {}
        }

        let members = self.load_members(yard_id, stack_number)?;
        let member_ids: Vec<String> = members.iter().map(|m| m.id.clone()).collect();
        let updated = self.call("apply_occupancy_deltas", || {
            self.topology.apply_occupancy_deltas(&member_ids, delta)
        })?;

        // 一个集装箱对每个独占持有者只计一次；共享分配不计入
        let mut owners: BTreeSet<String> = BTreeSet::new();
        for member in &members {
            let ledger = self.call("find_assignments_by_stack", || {
                self.store.find_assignments_by_stack(&member.id)
            })?;
            match ledger.iter().find(|a| a.is_exclusive) {
                Some(assignment) => {
                    owners.insert(assignment.pool_id.clone());
                }
                None if !ledger.is_empty() => {
                    tracing::debug!(stack_id = %member.id, shared = ledger.len(), "共享箱位不计入客户池占用");
                }
                None => {}
            }
        }
        let mut pools = Vec::with_capacity(owners.len());
        for pool_id in owners {
            let occupancy = self.call("apply_pool_occupancy_delta", || {
                self.store.apply_pool_occupancy_delta(&pool_id, delta)
            })?;
            pools.push((pool_id, occupancy));
        }

        tracing::info!(
            location_id,
            delta,
            members = ?updated,
            pools = ?pools,
            "箱位占用已更新"
        );
        Ok(OccupancyChange {
            location_id: location.to_string(),
            stack_number,
            members: updated,
            pools,
        })
    }

    /// 目标身份对应的物理箱位
    fn load_members(&self, yard_id: &str, target_stack_number: i32) -> ApiResult<Vec<Stack>> {
        let mut members = Vec::new();
        for number in PlacementValidator::member_numbers(target_stack_number) {
            let stack = self
                .call("find_by_number", || self.topology.find_by_number(yard_id, number))?
                .ok_or_else(|| {
                    ApiError::NotFound(format!("堆场{}中不存在箱位S{:02}", yard_id, number))
                })?;
            members.push(stack);
        }
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::pool_api::PoolApi;
    use crate::domain::assignment::AssignStackRequest;
    use crate::domain::location::is_valid_location_format;
    use crate::domain::pool::{ContractWindow, CreatePoolRequest};
    use crate::domain::types::PoolPriority;
    use crate::repository::{InMemoryAllocationStore, InMemoryStackTopology};
    use chrono::NaiveDate;

    fn stack(number: i32, size: ContainerSize, rows: i32, tiers: i32) -> Stack {
        Stack {
            id: format!("s{}", number),
            yard_id: "Y1".to_string(),
            stack_number: number,
            section_id: "SEC-A".to_string(),
            rows,
            max_tiers: tiers,
            position: None,
            container_size_capability: size,
            is_special_stack: false,
            is_virtual: false,
            current_occupancy: 0,
        }
    }

    struct Fixture {
        pools: PoolApi,
        placement: PlacementApi,
        store: Arc<InMemoryAllocationStore>,
        topology: Arc<InMemoryStackTopology>,
    }

    fn setup() -> Fixture {
        let mut s1 = stack(1, ContainerSize::Feet20, 4, 4);
        s1.is_special_stack = true;
        let store = Arc::new(InMemoryAllocationStore::new());
        let topology = Arc::new(InMemoryStackTopology::with_stacks(vec![
            s1,
            stack(3, ContainerSize::Feet40, 6, 5),
            stack(5, ContainerSize::Feet40, 5, 5),
            stack(7, ContainerSize::Feet20, 4, 4),
            stack(9, ContainerSize::Feet20, 4, 4),
        ]));
        let config = AllocationConfig::default();
        Fixture {
            pools: PoolApi::new(store.clone(), topology.clone(), config.clone()),
            placement: PlacementApi::new(store.clone(), topology.clone(), config),
            store,
            topology,
        }
    }

    fn create_pool(fx: &Fixture, code: &str, stacks: &[&str]) {
        fx.pools
            .create_pool(CreatePoolRequest {
                client_id: format!("C-{}", code),
                client_code: code.to_string(),
                client_name: code.to_string(),
                yard_id: "Y1".to_string(),
                initial_stacks: stacks.iter().map(|s| s.to_string()).collect(),
                max_capacity: None,
                priority: PoolPriority::Medium,
                contract: ContractWindow::open_ended(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()),
                notes: None,
                operator: "tester".to_string(),
            })
            .unwrap();
    }

    fn request(code: &str, size: ContainerSize) -> PlacementRequest {
        PlacementRequest {
            client_code: code.to_string(),
            container_size: size,
            yard_id: "Y1".to_string(),
        }
    }

    #[test]
    fn test_pooled_client_forty_foot_availability() {
        let fx = setup();
        create_pool(&fx, "ACME", &["s1", "s3", "s5"]);

        let candidates = fx
            .placement
            .get_available_stacks("ACME", ContainerSize::Feet40, "Y1")
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].label(), "S04");
        assert_eq!(candidates[0].total_capacity, 30);
    }

    #[test]
    fn test_unpooled_client_uses_unassigned_stacks() {
        let fx = setup();
        create_pool(&fx, "ACME", &["s3", "s7"]);

        let candidates = fx
            .placement
            .get_available_stacks("WALKIN", ContainerSize::Feet20, "Y1")
            .unwrap();
        let mut numbers: Vec<i32> = candidates.iter().map(|c| c.stack_number).collect();
        numbers.sort();
        assert_eq!(numbers, vec![1, 5, 9]);
        let assigned = fx.store.assigned_stack_ids().unwrap();
        assert!(candidates
            .iter()
            .all(|c| !assigned.contains(&c.member_stack_ids[0])));
    }

    #[test]
    fn test_available_positions_are_well_formed() {
        let fx = setup();
        create_pool(&fx, "ACME", &["s3", "s5"]);
        let slots = fx
            .placement
            .get_available_positions("ACME", ContainerSize::Feet40, "Y1")
            .unwrap();
        assert_eq!(slots.len(), 30);
        assert!(slots.iter().all(|s| is_valid_location_format(&s.location_id)));
        assert!(slots.iter().all(|s| s.location_id.starts_with("S04")));
    }

    #[test]
    fn test_validate_and_ensure() {
        let fx = setup();
        create_pool(&fx, "ACME", &["s3", "s5", "s7"]);

        let ok = fx
            .placement
            .validate_assignment(&request("ACME", ContainerSize::Feet40), 4)
            .unwrap();
        assert!(ok.is_valid);

        match fx
            .placement
            .ensure_assignment(&request("ACME", ContainerSize::Feet40), 3)
        {
            Err(ApiError::InvalidPlacement(_)) => {}
            other => panic!("Expected InvalidPlacement, got {:?}", other),
        }
        match fx
            .placement
            .ensure_assignment(&request("OTHER", ContainerSize::Feet20), 7)
        {
            Err(ApiError::AccessDenied(_)) => {}
            other => panic!("Expected AccessDenied, got {:?}", other),
        }
        match fx
            .placement
            .ensure_assignment(&request("ACME", ContainerSize::Feet20), 9)
        {
            Err(ApiError::AccessDenied(_)) => {}
            other => panic!("Expected AccessDenied, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_surfaces_ledger_drift() {
        let fx = setup();
        create_pool(&fx, "ACME", &["s7"]);
        let pool = fx.pools.get_pool("ACME").unwrap().unwrap();
        fx.store
            .overwrite_assigned_stacks_for_test(
                &pool.id,
                ["s7".to_string(), "s9".to_string()].into_iter().collect(),
            )
            .unwrap();

        match fx
            .placement
            .validate_assignment(&request("ACME", ContainerSize::Feet20), 9)
        {
            Err(ApiError::IntegrityError(_)) => {}
            other => panic!("Expected IntegrityError, got {:?}", other),
        }
    }

    #[test]
    fn test_forty_foot_gate_events_touch_both_members() {
        let fx = setup();
        create_pool(&fx, "ACME", &["s3", "s5"]);

        let change = fx
            .placement
            .gate_in("Y1", "S04R1H1", ContainerSize::Feet40)
            .unwrap();
        assert_eq!(
            change.members,
            vec![("s3".to_string(), 1), ("s5".to_string(), 1)]
        );
        let pool = fx.pools.get_pool("ACME").unwrap().unwrap();
        assert_eq!(change.pools, vec![(pool.id.clone(), 1)]);

        let change = fx
            .placement
            .gate_out("Y1", "S04R1H1", ContainerSize::Feet40)
            .unwrap();
        assert_eq!(change.pools, vec![(pool.id, 0)]);

        // 下限为 0
        let change = fx
            .placement
            .gate_out("Y1", "S04R1H1", ContainerSize::Feet40)
            .unwrap();
        assert_eq!(change.members[0].1, 0);
        assert_eq!(fx.topology.find_stack("s3").unwrap().unwrap().current_occupancy, 0);
    }

    #[test]
    fn test_gate_event_rejects_bad_location() {
        let fx = setup();
        match fx.placement.gate_in("Y1", "S4R1H1", ContainerSize::Feet20) {
            Err(ApiError::FormatError(_)) => {}
            other => panic!("Expected FormatError, got {:?}", other),
        }
        match fx.placement.gate_in("Y1", "S03R1H1", ContainerSize::Feet40) {
            Err(ApiError::InvalidPlacement(_)) => {}
            other => panic!("Expected InvalidPlacement, got {:?}", other),
        }
    }

    #[test]
    fn test_unassigned_stack_gate_in_has_no_pool() {
        let fx = setup();
        let change = fx
            .placement
            .gate_in("Y1", "S09R2H3", ContainerSize::Feet20)
            .unwrap();
        assert_eq!(change.members, vec![("s9".to_string(), 1)]);
        assert!(change.pools.is_empty());
    }

    #[test]
    fn test_split_pair_credits_each_exclusive_owner_once() {
        let fx = setup();
        create_pool(&fx, "ACME", &["s3"]);
        create_pool(&fx, "GLOBEX", &["s5"]);
        let acme = fx.pools.get_pool("ACME").unwrap().unwrap();
        let globex = fx.pools.get_pool("GLOBEX").unwrap().unwrap();

        let change = fx
            .placement
            .gate_in("Y1", "S04R2H1", ContainerSize::Feet40)
            .unwrap();
        let mut expected = vec![(acme.id, 1), (globex.id, 1)];
        expected.sort();
        assert_eq!(change.pools, expected);
    }

    #[test]
    fn test_shared_stack_gate_in_credits_no_pool() {
        let fx = setup();
        create_pool(&fx, "ACME", &[]);
        create_pool(&fx, "GLOBEX", &[]);
        for code in ["ACME", "GLOBEX"] {
            let pool = fx.pools.get_pool(code).unwrap().unwrap();
            fx.pools
                .assign_stack(AssignStackRequest {
                    stack_id: "s9".to_string(),
                    stack_number: 9,
                    pool_id: pool.id,
                    client_code: code.to_string(),
                    is_exclusive: false,
                    priority: PoolPriority::Low,
                    operator: "tester".to_string(),
                })
                .unwrap();
        }

        let change = fx
            .placement
            .gate_in("Y1", "S09R1H1", ContainerSize::Feet20)
            .unwrap();
        assert_eq!(change.members, vec![("s9".to_string(), 1)]);
        assert!(change.pools.is_empty());
        assert_eq!(fx.pools.get_pool("ACME").unwrap().unwrap().current_occupancy, 0);
        assert_eq!(fx.pools.get_pool("GLOBEX").unwrap().unwrap().current_occupancy, 0);
    }

    #[test]
    fn test_gate_event_on_missing_member_leaves_counters_untouched() {
        let store = Arc::new(InMemoryAllocationStore::new());
        let topology = Arc::new(InMemoryStackTopology::with_stacks(vec![stack(
            3,
            ContainerSize::Feet40,
            6,
            5,
        )]));
        let placement = PlacementApi::new(store, topology.clone(), AllocationConfig::default());

        match placement.gate_in("Y1", "S04R1H1", ContainerSize::Feet40) {
            Err(ApiError::NotFound(_)) => {}
            other => panic!("Expected NotFound, got {:?}", other),
        }
        assert_eq!(topology.find_stack("s3").unwrap().unwrap().current_occupancy, 0);
    }
}
