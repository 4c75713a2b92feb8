// ==========================================
// 堆场客户池分配引擎 - 落箱校验器
// ==========================================
// 职责: 提交落箱前的最终合法性检查（只读）
// 顺序: (a) 归属 → (b) 台账完整性 → (c) 40ft 虚拟箱位身份；首个失败即返回
// 红线: 台账缺失是数据损坏，不是普通拒绝，必须以错误上抛并高等级记录
// ==========================================

use crate::domain::assignment::StackAssignment;
use crate::domain::pool::ClientPool;
use crate::domain::stack::Stack;
use crate::domain::types::ContainerSize;
use crate::engine::pairing;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::instrument;

// ==========================================
// 请求与结果
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementRequest {
    pub client_code: String,
    pub container_size: ContainerSize,
    pub yard_id: String,
}

/// 拒绝类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlacementRejection {
    /// 目标箱位不属于客户的有效客户池
    AccessDenied,
    /// 目标身份不是合法落箱位置（40ft 必须落在虚拟箱位）
    InvalidPlacement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementValidation {
    pub is_valid: bool,
    pub reason: String,
    pub rejection: Option<PlacementRejection>,
}

impl PlacementValidation {
    fn accepted(target_stack_number: i32) -> Self {
        Self {
            is_valid: true,
            reason: format!("S{:02} 校验通过", target_stack_number),
            rejection: None,
        }
    }

    fn rejected(rejection: PlacementRejection, reason: String) -> Self {
        Self {
            is_valid: false,
            reason,
            rejection: Some(rejection),
        }
    }
}

/// 台账完整性错误: 池记录持有该箱位，但分配台账中没有有效记录
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("分配台账缺失: pool_id={pool_id}, stack_id={stack_id}")]
pub struct LedgerIntegrityError {
    pub pool_id: String,
    pub stack_id: String,
}

/// 校验所需的只读快照（由调用方从存储中加载）
#[derive(Debug, Clone, Copy)]
pub struct PlacementContext<'a> {
    pub pool: Option<&'a ClientPool>,
    /// 目标身份对应的物理箱位（虚拟箱位为两个成员）
    pub members: &'a [Stack],
    /// stack_id → 有效分配
    pub active_assignments: &'a HashMap<String, Vec<StackAssignment>>,
}

// ==========================================
// PlacementValidator
// ==========================================
#[derive(Debug, Default, Clone, Copy)]
pub struct PlacementValidator {}

impl PlacementValidator {
    pub fn new() -> Self {
        Self {}
    }

    /// 目标身份对应的物理箱位编号
    ///
    /// 合法虚拟箱位返回两个配对成员，否则按物理箱位处理
    pub fn member_numbers(target_stack_number: i32) -> Vec<i32> {
        match pairing::pair_for_virtual(target_stack_number) {
            Some((a, b)) => vec![a, b],
            None => vec![target_stack_number],
        }
    }

    /// 校验一次落箱
    ///
    /// # 返回
    /// - Ok(validation): is_valid=false 时 rejection 给出类别
    /// - Err(LedgerIntegrityError): 台账与池记录不一致
    #[instrument(skip(self, ctx), fields(client_code = %request.client_code))]
    pub fn validate(
        &self,
        request: &PlacementRequest,
        target_stack_number: i32,
        ctx: PlacementContext<'_>,
    ) -> Result<PlacementValidation, LedgerIntegrityError> {
        // (a) 归属
        let pool = match ctx.pool {
            Some(pool) if pool.is_active => pool,
            _ => {
                return Ok(PlacementValidation::rejected(
                    PlacementRejection::AccessDenied,
                    format!("客户 {} 没有有效客户池", request.client_code),
                ));
            }
        };

        if ctx.members.is_empty() {
            return Ok(PlacementValidation::rejected(
                PlacementRejection::AccessDenied,
                format!("S{:02} 不在客户池中", target_stack_number),
            ));
        }
        if let Some(foreign) = ctx.members.iter().find(|s| !pool.owns(&s.id)) {
            return Ok(PlacementValidation::rejected(
                PlacementRejection::AccessDenied,
                format!(
                    "箱位 S{:02} 不属于客户池 {}",
                    foreign.stack_number, pool.client_code
                ),
            ));
        }

        // (b) 台账完整性
        for member in ctx.members {
            let has_active = ctx
                .active_assignments
                .get(&member.id)
                .map(|list| list.iter().any(|a| a.pool_id == pool.id))
                .unwrap_or(false);
            if !has_active {
                tracing::error!(
                    pool_id = %pool.id,
                    stack_id = %member.id,
                    "客户池记录持有箱位但台账无有效分配"
                );
                return Err(LedgerIntegrityError {
                    pool_id: pool.id.clone(),
                    stack_id: member.id.clone(),
                });
            }
        }

        // (c) 身份
        let is_virtual_target = pairing::is_valid_virtual(target_stack_number);
        match request.container_size {
            ContainerSize::Feet40 => {
                if !is_virtual_target {
                    return Ok(PlacementValidation::rejected(
                        PlacementRejection::InvalidPlacement,
                        format!(
                            "40ft 箱必须落在虚拟箱位，S{:02} 不是合法虚拟箱位",
                            target_stack_number
                        ),
                    ));
                }
                if let Some(bad) = ctx
                    .members
                    .iter()
                    .find(|s| !s.accepts(ContainerSize::Feet40) || pairing::is_special(s))
                {
                    return Ok(PlacementValidation::rejected(
                        PlacementRejection::InvalidPlacement,
                        format!("配对成员 S{:02} 不能接收 40ft 箱", bad.stack_number),
                    ));
                }
            }
            ContainerSize::Feet20 => {
                if is_virtual_target {
                    return Ok(PlacementValidation::rejected(
                        PlacementRejection::InvalidPlacement,
                        format!("20ft 箱不能落在虚拟箱位 S{:02}", target_stack_number),
                    ));
                }
            }
        }

        Ok(PlacementValidation::accepted(target_stack_number))
    }
}
