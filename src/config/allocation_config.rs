// ==========================================
// 堆场客户池分配引擎 - 分配参数
// ==========================================
// 来源: config_kv 表（缺省时使用默认值），见 ConfigManager
// ==========================================

use crate::repository::retry::RetryPolicy;
use serde::{Deserialize, Serialize};

/// 释放仍有集装箱占用的箱位时的处理策略
///
/// 业务方尚未给出定论；默认阻止，由现场配置决定是否放开
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OccupiedReleasePolicy {
    /// 拒绝释放（ValidationError）
    Block,
    /// 允许释放并记录告警
    Release,
}

impl OccupiedReleasePolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BLOCK" => Some(OccupiedReleasePolicy::Block),
            "RELEASE" => Some(OccupiedReleasePolicy::Release),
            _ => None,
        }
    }
}

/// 分配引擎参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// 推荐占用率下限（含）
    pub recommend_min_ratio: f64,
    /// 推荐占用率上限（含）
    pub recommend_max_ratio: f64,
    /// 40ft 箱位单箱位容量达到该值即推荐
    pub forty_ft_recommend_capacity: i32,
    /// 存储调用重试策略
    pub retry: RetryPolicy,
    pub occupied_release_policy: OccupiedReleasePolicy,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            recommend_min_ratio: 0.20,
            recommend_max_ratio: 0.80,
            forty_ft_recommend_capacity: 25,
            retry: RetryPolicy::default(),
            occupied_release_policy: OccupiedReleasePolicy::Block,
        }
    }
}

impl AllocationConfig {
    /// 占用率是否落在推荐区间
    pub fn in_recommended_band(&self, ratio: f64) -> bool {
        ratio >= self.recommend_min_ratio && ratio <= self.recommend_max_ratio
    }
}
