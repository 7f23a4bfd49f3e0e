// ==========================================
// 生产领料与库存移动引擎 - API 层
// ==========================================
// 职责: 提供业务 API 接口,供请求处理器调用
// ==========================================

pub mod error;
pub mod production_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use production_api::ProductionApi;
