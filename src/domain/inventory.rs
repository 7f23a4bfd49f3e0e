// ==========================================
// 生产领料与库存移动引擎 - 库存领域模型
// ==========================================
// 职责: 货架库存、库存移动、库存分录
// 红线: 货架库存永不为负
// ==========================================

use crate::domain::serde_lenient::{lenient_f64, lenient_opt_i64};
use serde::{Deserialize, Serialize};

// ==========================================
// InventoryMove - 库存移动
// ==========================================
// 对齐: production_order.production_moves / handoff_moves JSON 列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryMove {
    #[serde(alias = "productId")]
    pub product_id: i64,
    #[serde(default, alias = "fromShelfId", deserialize_with = "lenient_opt_i64")]
    pub from_shelf_id: Option<i64>,
    #[serde(default, alias = "toShelfId", deserialize_with = "lenient_opt_i64")]
    pub to_shelf_id: Option<i64>,
    #[serde(default, alias = "qty", deserialize_with = "lenient_f64")]
    pub quantity: f64,
}

impl InventoryMove {
    pub fn new(product_id: i64, from_shelf_id: i64, to_shelf_id: i64, quantity: f64) -> Self {
        Self {
            product_id,
            from_shelf_id: Some(from_shelf_id),
            to_shelf_id: Some(to_shelf_id),
            quantity,
        }
    }

    /// 路线键 (product, from, to)，用于同路线合并
    pub fn route(&self) -> (i64, Option<i64>, Option<i64>) {
        (self.product_id, self.from_shelf_id, self.to_shelf_id)
    }

    /// 反向移动（from/to 互换）
    pub fn reversed(&self) -> Self {
        Self {
            product_id: self.product_id,
            from_shelf_id: self.to_shelf_id,
            to_shelf_id: self.from_shelf_id,
            quantity: self.quantity,
        }
    }
}

// ==========================================
// ShelfStockRecord - 货架库存
// ==========================================
// 对齐: shelf_stock 表，主键 (product_id, shelf_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShelfStockRecord {
    pub product_id: i64,
    pub shelf_id: i64,
    pub warehouse_id: i64,
    pub stock: f64,
}

// ==========================================
// StockLeg - 库存分录
// ==========================================
/// 单条库存增减（delta < 0 为出库，> 0 为入库）
///
/// 一次移动拆成“源货架出库 + 目标货架入库”两条分录，按顺序执行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockLeg {
    pub product_id: i64,
    pub shelf_id: i64,
    pub delta: f64,
}

impl StockLeg {
    pub fn decrement(product_id: i64, shelf_id: i64, quantity: f64) -> Self {
        Self {
            product_id,
            shelf_id,
            delta: -quantity,
        }
    }

    pub fn increment(product_id: i64, shelf_id: i64, quantity: f64) -> Self {
        Self {
            product_id,
            shelf_id,
            delta: quantity,
        }
    }

    pub fn is_decrement(&self) -> bool {
        self.delta < 0.0
    }
}

// ==========================================
// 外部协作方数据（商品目录 / 货架目录）
// ==========================================

/// 商品信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub product_id: i64,
    pub code: String,
    pub name: String,
    pub category_code: Option<String>,
    pub main_unit: Option<String>,
    pub sub_unit: Option<String>,
    /// 每 1 主单位折合的辅单位数量
    pub sub_unit_ratio: Option<f64>,
}

/// 货架信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShelfInfo {
    pub shelf_id: i64,
    pub warehouse_id: i64,
    pub name: String,
}

/// 商品库存汇总（product.stock 缓存值）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductStockSummary {
    pub product_id: i64,
    pub stock: f64,
    pub sub_stock: Option<f64>,
}

/// 主单位数量折算为辅单位数量
///
/// 比例缺失或非正时不折算
pub fn convert_to_sub_unit(quantity: f64, sub_unit_ratio: Option<f64>) -> Option<f64> {
    match sub_unit_ratio {
        Some(ratio) if ratio.is_finite() && ratio > 0.0 => Some(quantity * ratio),
        _ => None,
    }
}
