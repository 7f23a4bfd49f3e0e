// ==========================================
// 生产领料与库存移动引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod inventory;
pub mod material_group;
pub mod order;
pub mod serde_lenient;
pub mod types;

// 重导出核心类型
pub use inventory::{
    convert_to_sub_unit, InventoryMove, ProductInfo, ProductStockSummary, ShelfInfo,
    ShelfStockRecord, StockLeg,
};
pub use material_group::{
    DeliveryRow, DeliveryRowField, Draft, GroupPiece, OrderRequirement, StartMaterialGroup,
    UnresolvedRow,
};
pub use order::{MaterialRequirementRow, PieceRequirement, ProductionOrder};
pub use types::{ProductionStatus, TransferMode};
