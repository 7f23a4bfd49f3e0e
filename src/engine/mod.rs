// ==========================================
// 生产领料与库存移动引擎 - 引擎层
// ==========================================
// 职责: 实现业务规则引擎,不拼 SQL
// 红线: Engine 不拼 SQL, 每个被拒绝的操作必须说明原因
// ==========================================

pub mod aggregator;
pub mod catalog;
pub mod error;
pub mod inventory_move;
pub mod ledger;
pub mod lifecycle;
pub mod splitter;

// 重导出核心引擎
pub use aggregator::{piece_key, MaterialRequirementAggregator};
pub use catalog::{MaterialCatalog, StaticCatalog, StockReader};
pub use error::{EngineError, EngineResult};
pub use inventory_move::InventoryMoveEngine;
pub use ledger::DeliveryLedger;
pub use lifecycle::{ProductionLifecycleController, TransitionOutcome, TransitionPlan};
pub use splitter::{
    split_proportionally, AllocationSplitter, PieceDeliveredMap, RequirementAllocation,
};
