// ==========================================
// 生产领料与库存移动引擎 - 领域类型定义
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 工单状态 (Production Status)
// ==========================================
// 红线: 只允许 pending → in_progress → completed 单向推进，
//       唯一回退路径是 stop: in_progress → pending
// 序列化格式: snake_case (与数据库一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductionStatus {
    Pending,    // 待生产
    InProgress, // 生产中
    Completed,  // 已完工
}

impl ProductionStatus {
    /// 数据库存储字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            ProductionStatus::Pending => "pending",
            ProductionStatus::InProgress => "in_progress",
            ProductionStatus::Completed => "completed",
        }
    }

    /// 从数据库字符串解析（未知值返回 None，由仓储层报错）
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.trim() {
            "pending" => Some(ProductionStatus::Pending),
            "in_progress" => Some(ProductionStatus::InProgress),
            "completed" => Some(ProductionStatus::Completed),
            _ => None,
        }
    }

    /// 判断状态转换是否合法
    pub fn can_transition_to(&self, next: ProductionStatus) -> bool {
        matches!(
            (self, next),
            (ProductionStatus::Pending, ProductionStatus::InProgress)
                | (ProductionStatus::InProgress, ProductionStatus::Completed)
                | (ProductionStatus::InProgress, ProductionStatus::Pending)
        )
    }
}

impl fmt::Display for ProductionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 交付行转移模式 (Transfer Mode)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    Copy, // 复制: 目标组生成新ID，与源行无关联
    Move, // 移动: 从源组删除
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMode::Copy => write!(f, "copy"),
            TransferMode::Move => write!(f, "move"),
        }
    }
}
