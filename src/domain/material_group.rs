// ==========================================
// 生产领料与库存移动引擎 - 开工物料组领域模型
// ==========================================
// 职责: 跨工单按 (类别, 商品) 归集的物料组、交付行、草稿
// 说明: 物料组是每次开工尝试的临时聚合，不按原样持久化；
//       草稿 (Draft) 由调用方缓存并回传，引擎在两次调用之间无状态
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// GroupPiece - 归一后的部件需求
// ==========================================
/// 用量已解析为确定值的部件（per_item_usage / total_usage 不再是 Option）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupPiece {
    pub key: String,
    pub name: String,
    pub length: f64,
    pub width: f64,
    pub quantity: f64,
    pub main_unit: Option<String>,
    pub sub_unit: Option<String>,
    pub per_item_usage: f64,
    pub total_usage: f64,
    pub sub_usage: Option<f64>,
}

impl GroupPiece {
    /// 合并键: 同名同规格同单位的部件在组内合并
    pub fn merge_key(&self) -> (String, u64, u64, Option<String>) {
        (
            self.name.clone(),
            self.length.to_bits(),
            self.width.to_bits(),
            self.main_unit.clone(),
        )
    }
}

// ==========================================
// OrderRequirement - 单工单对物料组的贡献
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequirement {
    pub order_id: i64,
    /// 需求行在工单中的下标
    pub row_index: usize,
    /// 需求行键（定位持久化行时优先使用）
    pub row_key: Option<String>,
    pub pieces: Vec<GroupPiece>,
    pub total_usage: f64,
}

// ==========================================
// DeliveryRow - 交付行（操作员录入）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRow {
    pub id: String,
    pub name: String,
    pub length: f64,
    pub width: f64,
    pub quantity: f64,
    pub main_unit: Option<String>,
    pub sub_unit: Option<String>,
    /// 派生值: max(0, 长 × 宽 × 数量)，不独立于输入存储
    pub delivered_qty: f64,
}

impl DeliveryRow {
    /// 以部件为默认值创建交付行
    pub fn from_piece(id: String, piece: Option<&GroupPiece>) -> Self {
        let mut row = match piece {
            Some(p) => Self {
                id,
                name: p.name.clone(),
                length: p.length.max(0.0),
                width: p.width.max(0.0),
                quantity: p.quantity.max(0.0),
                main_unit: p.main_unit.clone(),
                sub_unit: p.sub_unit.clone(),
                delivered_qty: 0.0,
            },
            None => Self {
                id,
                name: String::new(),
                length: 0.0,
                width: 0.0,
                quantity: 0.0,
                main_unit: None,
                sub_unit: None,
                delivered_qty: 0.0,
            },
        };
        row.recompute();
        row
    }

    /// 交付量计算公式
    pub fn compute_delivered_qty(length: f64, width: f64, quantity: f64) -> f64 {
        let value = length * width * quantity;
        if value.is_finite() && value > 0.0 {
            value
        } else {
            0.0
        }
    }

    /// 重新计算派生交付量
    pub fn recompute(&mut self) {
        self.delivered_qty = Self::compute_delivered_qty(self.length, self.width, self.quantity);
    }
}

/// 交付行可编辑字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum DeliveryRowField {
    Name(String),
    Length(f64),
    Width(f64),
    Quantity(f64),
    MainUnit(Option<String>),
    SubUnit(Option<String>),
}

// ==========================================
// StartMaterialGroup - 开工物料组
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartMaterialGroup {
    /// 组键: 类别 + 商品ID
    pub key: String,
    pub category: String,
    pub category_label: Option<String>,
    pub selected_product_id: i64,
    pub product_name: Option<String>,
    pub product_code: Option<String>,

    /// 合并后的部件（来自全部贡献工单）
    pub pieces: Vec<GroupPiece>,

    pub source_shelf_id: Option<i64>,
    pub production_shelf_id: Option<i64>,

    pub delivery_rows: Vec<DeliveryRow>,
    /// 派生值: Σ delivery_rows.delivered_qty
    pub total_delivered_qty: f64,
    pub is_confirmed: bool,

    /// 按工单的需求贡献（分摊与按单回滚的依据）
    pub order_requirements: Vec<OrderRequirement>,
}

impl StartMaterialGroup {
    /// 组键格式
    pub fn group_key(category: &str, product_id: i64) -> String {
        format!("{}::{}", category, product_id)
    }

    /// 全部工单需求量之和
    pub fn total_usage(&self) -> f64 {
        self.order_requirements.iter().map(|r| r.total_usage).sum()
    }

    /// 重算每行交付量与组合计
    pub fn recompute_totals(&mut self) {
        for row in self.delivery_rows.iter_mut() {
            row.recompute();
        }
        self.total_delivered_qty = self.delivery_rows.iter().map(|r| r.delivered_qty).sum();
    }
}

// ==========================================
// UnresolvedRow - 无法归集的需求行
// ==========================================
/// 未选商品或商品不存在的需求行，归集时跳过并上报调用方
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedRow {
    pub order_id: i64,
    pub order_no: String,
    pub row_index: usize,
    pub category: String,
    pub reason: String,
}

// ==========================================
// Draft - 开工草稿
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub order_ids: Vec<i64>,
    pub groups: Vec<StartMaterialGroup>,
    pub unresolved_rows: Vec<UnresolvedRow>,
    pub created_at: NaiveDateTime,
}

impl Draft {
    pub fn group(&self, key: &str) -> Option<&StartMaterialGroup> {
        self.groups.iter().find(|g| g.key == key)
    }

    pub fn group_mut(&mut self, key: &str) -> Option<&mut StartMaterialGroup> {
        self.groups.iter_mut().find(|g| g.key == key)
    }

    /// 已确认的物料组
    pub fn confirmed_groups(&self) -> impl Iterator<Item = &StartMaterialGroup> {
        self.groups.iter().filter(|g| g.is_confirmed)
    }
}
