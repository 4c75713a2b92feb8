// ==========================================
// 堆场客户池分配引擎 - 存储调用退避重试
// ==========================================
// 规则: 只重试瞬时错误（连接失败/数据库繁忙），指数退避且有上限
// 红线: 校验/冲突/完整性错误绝不重试
// ==========================================

use crate::repository::error::RepositoryResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 退避重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// 不重试（测试用）
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// 第 attempt 次失败后的等待时长（attempt 从 1 开始）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// 执行存储操作，瞬时错误按策略退避重试
///
/// 重试耗尽后返回最后一次的瞬时错误
pub fn with_retry<T, F>(policy: &RetryPolicy, operation: &str, mut f: F) -> RepositoryResult<T>
where
    F: FnMut() -> RepositoryResult<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "存储瞬时错误，退避后重试"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::error!(operation, attempt, error = %e, "存储瞬时错误，重试次数已耗尽");
                }
                return Err(e);
            }
        }
    }
}
