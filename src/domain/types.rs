// ==========================================
// 堆场客户池分配引擎 - 领域类型定义
// ==========================================
// 职责: 箱型、池优先级、堆场分区等枚举
// 序列化格式: 与数据库存储值一致
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 箱型尺寸 (Container Size)
// ==========================================
// 40ft 箱物理上横跨两个相邻 20ft 箱位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerSize {
    #[serde(rename = "20ft")]
    Feet20,
    #[serde(rename = "40ft")]
    Feet40,
}

impl ContainerSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerSize::Feet20 => "20ft",
            ContainerSize::Feet40 => "40ft",
        }
    }

    /// 从数据库/外部字符串解析（容忍 "20" / "40FT" 等写法）
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().trim_end_matches("ft") {
            "20" => Some(ContainerSize::Feet20),
            "40" => Some(ContainerSize::Feet40),
            _ => None,
        }
    }
}

impl fmt::Display for ContainerSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 客户池优先级 (Pool Priority)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolPriority {
    High,
    Medium,
    Low,
}

impl PoolPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolPriority::High => "high",
            PoolPriority::Medium => "medium",
            PoolPriority::Low => "low",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Some(PoolPriority::High),
            "medium" => Some(PoolPriority::Medium),
            "low" => Some(PoolPriority::Low),
            _ => None,
        }
    }
}

impl Default for PoolPriority {
    fn default() -> Self {
        PoolPriority::Medium
    }
}

impl fmt::Display for PoolPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 堆场分区 (Yard Zone)
// ==========================================
// 不同分区的 40ft 配对规则不同，见 engine::pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum YardZone {
    ZoneA, // 1 ~ 29
    ZoneB, // 31 ~ 55
    ZoneC, // 57 ~ 79
}

impl fmt::Display for YardZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            YardZone::ZoneA => write!(f, "ZONE_A"),
            YardZone::ZoneB => write!(f, "ZONE_B"),
            YardZone::ZoneC => write!(f, "ZONE_C"),
        }
    }
}
