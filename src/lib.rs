// ==========================================
// 生产领料与库存移动引擎 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 进程内库，由请求处理器调用；自身不提供网络协议
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 引擎参数
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{ProductionStatus, TransferMode};

// 领域实体
pub use domain::{
    DeliveryRow, DeliveryRowField, Draft, InventoryMove, MaterialRequirementRow,
    PieceRequirement, ProductionOrder, ShelfStockRecord, StartMaterialGroup,
};

// 引擎
pub use engine::{
    AllocationSplitter, DeliveryLedger, EngineError, InventoryMoveEngine,
    MaterialRequirementAggregator, ProductionLifecycleController,
};

// API
pub use api::{ApiError, ApiResult, ProductionApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "生产领料与库存移动引擎";
