// ==========================================
// 堆场客户池分配引擎 - 核心库
// ==========================================
// 职责: 堆场箱位有效容量计算、客户池独占归属、可用箱位解析、落箱校验
// 技术栈: Rust + SQLite
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 存储端口与适配器
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 导入层 - 占用回填
pub mod importer;

// 配置层 - 分配参数
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - 装配
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{ContainerSize, PoolPriority, YardZone};

// 领域实体
pub use domain::{
    AssignStackRequest, BulkAssignResult, CapacityInfo, ClientPool, ContractWindow,
    CreatePoolRequest, LocationId, PoolStats, PoolUpdate, Stack, StackAssignment,
};

// 引擎
pub use engine::{
    AvailabilityResolver, CapacityCalculator, PlacementRequest, PlacementValidation,
    PlacementValidator, StackCandidate,
};

// API
pub use api::{ApiError, ApiResult, PlacementApi, PoolApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "堆场客户池分配引擎";
