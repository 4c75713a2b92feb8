// ==========================================
// 堆场客户池分配引擎 - 可用箱位解析器
// ==========================================
// 输入: 客户池（可无） + 堆场箱位 + 有效分配集合 + 箱型
// 输出: 排序后的候选箱位 / 单元位置
// 红线: 40ft 箱的落箱身份是虚拟箱位 min(a, b) + 1，绝不是物理奇数箱位
// 红线: 只读；解析过程不产生任何写入
// ==========================================

use crate::config::AllocationConfig;
use crate::domain::location::{LocationFormatError, LocationId};
use crate::domain::pool::ClientPool;
use crate::domain::stack::Stack;
use crate::domain::types::ContainerSize;
use crate::engine::pairing;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::instrument;

/// 无坐标箱位的距离（排在最后）
const UNKNOWN_DISTANCE: u32 = u32::MAX;

/// 位置展开时预分配的单元上限
const PREALLOCATED_CELLS_LIMIT: i32 = 4_096;

// ==========================================
// 请求与结果
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityRequest {
    pub client_code: String,
    pub container_size: ContainerSize,
    pub yard_id: String,
}

/// 候选箱位（20ft 为物理箱位，40ft 为虚拟箱位）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackCandidate {
    pub stack_number: i32,
    pub is_virtual: bool,
    pub member_stack_ids: Vec<String>,
    pub member_stack_numbers: Vec<i32>,
    pub section_id: String,
    pub container_size: ContainerSize,
    pub rows: i32,
    pub max_tiers: i32,
    pub total_capacity: i32,
    pub current_occupancy: i32,
    pub available_slots: i32,
    pub occupancy_ratio: f64,
    pub is_recommended: bool,
    pub distance: u32,
}

impl StackCandidate {
    /// 箱位标签，例如 S04
    pub fn label(&self) -> String {
        format!("S{:02}", self.stack_number)
    }
}

/// 单元位置（行 × 层）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSlot {
    pub location_id: String,
    pub stack_number: i32,
    pub row: i32,
    pub height: i32,
    pub is_available: bool,
}

// ==========================================
// AvailabilityResolver
// ==========================================
pub struct AvailabilityResolver {
    config: AllocationConfig,
}

impl AvailabilityResolver {
    pub fn new(config: AllocationConfig) -> Self {
        Self { config }
    }

    /// 候选全集
    ///
    /// - 有有效客户池: 池内箱位
    /// - 无有效客户池: 没有任何有效分配的箱位（未签约客户从公共池取位）
    ///
    /// 虚拟身份不进入候选全集
    pub fn candidate_universe(
        pool: Option<&ClientPool>,
        yard_stacks: &[Stack],
        assigned_stack_ids: &HashSet<String>,
    ) -> Vec<Stack> {
        yard_stacks
            .iter()
            .filter(|s| !s.is_virtual_identity())
            .filter(|s| match pool {
                Some(p) => p.owns(&s.id),
                None => !assigned_stack_ids.contains(&s.id),
            })
            .cloned()
            .collect()
    }

    /// 从候选全集解析出排序后的可用箱位
    #[instrument(skip(self, universe), fields(universe_count = universe.len()))]
    pub fn resolve(&self, universe: &[Stack], size: ContainerSize) -> Vec<StackCandidate> {
        let mut candidates = match size {
            ContainerSize::Feet20 => self.resolve_twenty(universe),
            ContainerSize::Feet40 => self.resolve_forty(universe),
        };

        candidates.retain(|c| c.available_slots > 0);
        candidates.sort_by(Self::rank);

        tracing::debug!(candidates = candidates.len(), "可用箱位解析完成");
        candidates
    }

    fn resolve_twenty(&self, universe: &[Stack]) -> Vec<StackCandidate> {
        universe
            .iter()
            .filter(|s| s.accepts(ContainerSize::Feet20))
            .map(|s| {
                let ratio = s.occupancy_ratio();
                StackCandidate {
                    stack_number: s.stack_number,
                    is_virtual: false,
                    member_stack_ids: vec![s.id.clone()],
                    member_stack_numbers: vec![s.stack_number],
                    section_id: s.section_id.clone(),
                    container_size: ContainerSize::Feet20,
                    rows: s.rows,
                    max_tiers: s.max_tiers,
                    total_capacity: s.capacity(),
                    current_occupancy: s.current_occupancy,
                    available_slots: s.available_slots(),
                    occupancy_ratio: ratio,
                    is_recommended: self.config.in_recommended_band(ratio),
                    distance: distance_of(s),
                }
            })
            .collect()
    }

    /// 40ft: 只有固定配对表中、非特殊、双成员都在候选全集中的 40ft 箱位才可用
    fn resolve_forty(&self, universe: &[Stack]) -> Vec<StackCandidate> {
        let eligible: HashMap<i32, &Stack> = universe
            .iter()
            .filter(|s| s.accepts(ContainerSize::Feet40) && !pairing::is_special(s))
            .map(|s| (s.stack_number, s))
            .collect();

        let mut seen_pairs: HashSet<(i32, i32)> = HashSet::new();
        let mut candidates = Vec::new();

        for stack in universe {
            let Some(&this) = eligible.get(&stack.stack_number) else {
                continue;
            };
            let Some(partner) = pairing::partner_of(this.stack_number)
                .and_then(|p| eligible.get(&p).copied())
            else {
                continue;
            };

            let key = pairing::pair_key(this.stack_number, partner.stack_number);
            if !seen_pairs.insert(key) {
                continue;
            }

            let (lower, upper) = if this.stack_number < partner.stack_number {
                (this, partner)
            } else {
                (partner, this)
            };

            let total_capacity = lower.capacity();
            let occupancy = lower.current_occupancy.max(upper.current_occupancy);
            let ratio = if total_capacity > 0 {
                occupancy as f64 / total_capacity as f64
            } else {
                0.0
            };
            let is_recommended = self.config.in_recommended_band(ratio)
                || total_capacity >= self.config.forty_ft_recommend_capacity;

            candidates.push(StackCandidate {
                stack_number: pairing::virtual_stack_number(key.0, key.1),
                is_virtual: true,
                member_stack_ids: vec![lower.id.clone(), upper.id.clone()],
                member_stack_numbers: vec![lower.stack_number, upper.stack_number],
                section_id: lower.section_id.clone(),
                container_size: ContainerSize::Feet40,
                rows: lower.rows,
                max_tiers: lower.max_tiers,
                total_capacity,
                current_occupancy: occupancy,
                available_slots: (total_capacity - occupancy).max(0),
                occupancy_ratio: ratio,
                is_recommended,
                distance: distance_of(lower).min(distance_of(upper)),
            });
        }

        candidates
    }

    /// 排序: 推荐优先 → 可用箱位数降序 → 距离升序 → 编号升序
    fn rank(a: &StackCandidate, b: &StackCandidate) -> Ordering {
        b.is_recommended
            .cmp(&a.is_recommended)
            .then_with(|| b.available_slots.cmp(&a.available_slots))
            .then_with(|| a.distance.cmp(&b.distance))
            .then_with(|| a.stack_number.cmp(&b.stack_number))
    }

    /// 展开为行 × 层单元位置
    ///
    /// 单元级占用不单独跟踪，可用性取自所属箱位的 available_slots
    pub fn expand_positions(
        candidate: &StackCandidate,
    ) -> Result<Vec<PositionSlot>, LocationFormatError> {
        let cells = candidate.rows.max(0).saturating_mul(candidate.max_tiers.max(0));
        let mut slots = Vec::with_capacity(cells.min(PREALLOCATED_CELLS_LIMIT) as usize);
        for row in 1..=candidate.rows {
            for height in 1..=candidate.max_tiers {
                let id = LocationId::new(candidate.stack_number, row, height)?;
                slots.push(PositionSlot {
                    location_id: id.format_checked()?,
                    stack_number: candidate.stack_number,
                    row,
                    height,
                    is_available: candidate.available_slots > 0,
                });
            }
        }
        Ok(slots)
    }
}

fn distance_of(stack: &Stack) -> u32 {
    stack
        .position
        .map(|p| p.manhattan_from_origin())
        .unwrap_or(UNKNOWN_DISTANCE)
}
