// ==========================================
// 生产领料与库存移动引擎 - 配置层
// ==========================================
// 职责: 引擎运行参数管理
// 存储: config_kv 表
// ==========================================

pub mod config_manager;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager, EngineConfig, MAX_STOCK_EPSILON};
