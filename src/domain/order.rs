// ==========================================
// 生产领料与库存移动引擎 - 生产工单领域模型
// ==========================================
// 职责: 生产工单、物料需求行、部件需求
// 对齐: production_order 表；material_requirement_rows 为 JSON 列
// ==========================================
// 说明: 需求行由外部 BOM 编辑器写入，历史数据存在多种字段拼写，
//       统一通过 serde alias 在反序列化时归一为下列严格字段名
// ==========================================

use crate::domain::inventory::InventoryMove;
use crate::domain::serde_lenient::{
    lenient_f64, lenient_opt_f64, lenient_opt_i64, lenient_opt_string, lenient_string,
};
use crate::domain::types::ProductionStatus;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// PieceRequirement - 部件需求
// ==========================================
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PieceRequirement {
    #[serde(
        default,
        alias = "pieceKey",
        alias = "piece_key",
        deserialize_with = "lenient_opt_string"
    )]
    pub key: Option<String>,

    #[serde(
        default,
        alias = "pieceName",
        alias = "piece_name",
        deserialize_with = "lenient_string"
    )]
    pub name: String,

    // ===== 规格 =====
    #[serde(default, alias = "len", deserialize_with = "lenient_f64")]
    pub length: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub width: f64,
    #[serde(default, alias = "qty", alias = "count", deserialize_with = "lenient_f64")]
    pub quantity: f64,

    // ===== 单位 =====
    #[serde(
        default,
        alias = "mainUnit",
        alias = "unit",
        deserialize_with = "lenient_opt_string"
    )]
    pub main_unit: Option<String>,
    #[serde(default, alias = "subUnit", deserialize_with = "lenient_opt_string")]
    pub sub_unit: Option<String>,

    // ===== 用量 =====
    /// 单件用量（显式值；缺失时由归集器用 total_usage / 工单数量 推导）
    #[serde(
        default,
        alias = "perItemUsage",
        alias = "usage",
        alias = "unitUsage",
        deserialize_with = "lenient_opt_f64"
    )]
    pub per_item_usage: Option<f64>,
    /// 原始总用量
    #[serde(
        default,
        alias = "totalUsage",
        alias = "total",
        deserialize_with = "lenient_opt_f64"
    )]
    pub total_usage: Option<f64>,
    /// 辅单位用量
    #[serde(default, alias = "subUsage", deserialize_with = "lenient_opt_f64")]
    pub sub_usage: Option<f64>,

    // ===== 开工回写 =====
    #[serde(
        default,
        alias = "deliveredQty",
        alias = "delivered",
        deserialize_with = "lenient_opt_f64"
    )]
    pub delivered_qty: Option<f64>,
}

// ==========================================
// MaterialRequirementRow - 物料需求行
// ==========================================
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MaterialRequirementRow {
    #[serde(
        default,
        alias = "rowKey",
        alias = "key",
        deserialize_with = "lenient_opt_string"
    )]
    pub row_key: Option<String>,

    #[serde(
        default,
        alias = "categoryCode",
        alias = "category_code",
        alias = "categoryId",
        deserialize_with = "lenient_string"
    )]
    pub category: String,

    #[serde(
        default,
        alias = "selectedProductId",
        alias = "productId",
        alias = "product_id",
        deserialize_with = "lenient_opt_i64"
    )]
    pub selected_product_id: Option<i64>,

    #[serde(
        default,
        alias = "sourceShelfId",
        alias = "shelfId",
        alias = "shelf_id",
        deserialize_with = "lenient_opt_i64"
    )]
    pub source_shelf_id: Option<i64>,

    #[serde(
        default,
        alias = "productionShelfId",
        deserialize_with = "lenient_opt_i64"
    )]
    pub production_shelf_id: Option<i64>,

    #[serde(
        default,
        alias = "deliveredQty",
        deserialize_with = "lenient_opt_f64"
    )]
    pub delivered_qty: Option<f64>,

    #[serde(default, alias = "pieceList", alias = "items")]
    pub pieces: Vec<PieceRequirement>,
}

impl MaterialRequirementRow {
    /// 是否仍属于 (类别, 商品) 物料组；类别为空时由商品目录推断，只比较商品
    pub fn belongs_to(&self, category: &str, product_id: i64) -> bool {
        let own_category = self.category.trim();
        self.selected_product_id == Some(product_id)
            && (own_category.is_empty() || own_category == category)
    }

    /// 清除开工回写的交付/货架标注
    pub fn clear_delivery_annotations(&mut self) {
        self.source_shelf_id = None;
        self.production_shelf_id = None;
        self.delivered_qty = None;
        for piece in self.pieces.iter_mut() {
            piece.delivered_qty = None;
        }
    }
}

// ==========================================
// ProductionOrder - 生产工单
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionOrder {
    // ===== 主键 =====
    pub order_id: i64,
    pub order_no: String,

    // ===== 状态 =====
    pub status: ProductionStatus,
    pub quantity: f64,

    // ===== 物料 =====
    pub material_requirement_rows: Vec<MaterialRequirementRow>,
    pub production_shelf_id: Option<i64>,
    /// 开工时本工单分摊到的移动（停工回滚 / 完工消耗的依据）
    pub production_moves: Vec<InventoryMove>,
    /// 产线交接记录（存在时完工优先消耗此记录）
    pub handoff_moves: Vec<InventoryMove>,

    // ===== 时间戳 =====
    pub started_at: Option<NaiveDateTime>,
    pub stopped_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,

    // ===== 产出 =====
    pub output_product_id: Option<i64>,
    pub output_shelf_id: Option<i64>,
    pub output_quantity: Option<f64>,
}

impl ProductionOrder {
    /// 创建待生产工单
    pub fn new(order_id: i64, order_no: &str, quantity: f64) -> Self {
        Self {
            order_id,
            order_no: order_no.to_string(),
            status: ProductionStatus::Pending,
            quantity,
            material_requirement_rows: Vec::new(),
            production_shelf_id: None,
            production_moves: Vec::new(),
            handoff_moves: Vec::new(),
            started_at: None,
            stopped_at: None,
            completed_at: None,
            output_product_id: None,
            output_shelf_id: None,
            output_quantity: None,
        }
    }

    /// 工单数量（缺失或非正时按 1 处理，避免除零）
    pub fn order_quantity(&self) -> f64 {
        if self.quantity.is_finite() && self.quantity > 0.0 {
            self.quantity
        } else {
            1.0
        }
    }

    /// 定位需求行: 先按 row_key 匹配，匹配不到再按下标
    pub fn locate_row(&self, row_key: Option<&str>, row_index: usize) -> Option<usize> {
        if let Some(key) = row_key {
            if let Some(pos) = self
                .material_requirement_rows
                .iter()
                .position(|row| row.row_key.as_deref() == Some(key))
            {
                return Some(pos);
            }
        }
        if row_index < self.material_requirement_rows.len() {
            Some(row_index)
        } else {
            None
        }
    }

    /// 完工时应消耗的移动: 交接记录优先，否则取开工移动
    pub fn consumption_moves(&self) -> &[InventoryMove] {
        if self.handoff_moves.is_empty() {
            &self.production_moves
        } else {
            &self.handoff_moves
        }
    }
}
