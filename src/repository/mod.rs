// ==========================================
// 生产领料与库存移动引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod catalog_repo;
pub mod error;
pub mod order_repo;
pub mod shelf_stock_repo;
pub mod transition_repo;

// 重导出核心仓储
pub use catalog_repo::CatalogRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use order_repo::ProductionOrderRepository;
pub use shelf_stock_repo::ShelfStockRepository;
pub use transition_repo::{GuardedOrderWrite, TransitionRepository, TransitionWriteSet};
