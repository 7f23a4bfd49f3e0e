// ==========================================
// 生产领料与库存移动引擎 - 生产工单仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 对齐: production_order 表
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::inventory::InventoryMove;
use crate::domain::order::{MaterialRequirementRow, ProductionOrder};
use crate::domain::types::ProductionStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

const SELECT_COLUMNS: &str = r#"
    SELECT
        order_id, order_no, status, quantity,
        material_requirement_rows, production_shelf_id,
        production_moves, handoff_moves,
        started_at, stopped_at, completed_at,
        output_product_id, output_shelf_id, output_quantity
    FROM production_order
"#;

// ==========================================
// ProductionOrderRepository - 生产工单仓储
// ==========================================
pub struct ProductionOrderRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ProductionOrderRepository {
    /// 创建新的 ProductionOrderRepository 实例
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 新建工单
    pub fn insert(&self, order: &ProductionOrder) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO production_order (
                order_id, order_no, status, quantity,
                material_requirement_rows, production_shelf_id,
                production_moves, handoff_moves,
                started_at, stopped_at, completed_at,
                output_product_id, output_shelf_id, output_quantity,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, datetime('now'))
            "#,
            params![
                order.order_id,
                order.order_no,
                order.status.to_db_str(),
                order.quantity,
                serde_json::to_string(&order.material_requirement_rows)?,
                order.production_shelf_id,
                serde_json::to_string(&order.production_moves)?,
                serde_json::to_string(&order.handoff_moves)?,
                format_datetime(order.started_at),
                format_datetime(order.stopped_at),
                format_datetime(order.completed_at),
                order.output_product_id,
                order.output_shelf_id,
                order.output_quantity,
            ],
        )?;
        Ok(())
    }

    /// 按主键查询
    pub fn find_by_id(&self, order_id: i64) -> RepositoryResult<Option<ProductionOrder>> {
        let conn = self.get_conn()?;
        find_by_id_in_conn(&conn, order_id)
    }

    /// 按ID列表查询（保持请求顺序；任一不存在即报 NotFound）
    pub fn find_by_ids(&self, order_ids: &[i64]) -> RepositoryResult<Vec<ProductionOrder>> {
        let conn = self.get_conn()?;
        order_ids
            .iter()
            .map(|id| {
                find_by_id_in_conn(&conn, *id)?.ok_or_else(|| RepositoryError::NotFound {
                    entity: "production_order".to_string(),
                    id: id.to_string(),
                })
            })
            .collect()
    }

    /// 更新物料需求行（外部 BOM 编辑器写入口）
    pub fn update_requirement_rows(
        &self,
        order_id: i64,
        rows: &[MaterialRequirementRow],
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE production_order
            SET material_requirement_rows = ?2, updated_at = datetime('now')
            WHERE order_id = ?1
            "#,
            params![order_id, serde_json::to_string(rows)?],
        )?;
        ensure_found(affected, order_id)
    }

    /// 记录产线交接移动
    pub fn set_handoff_moves(&self, order_id: i64, moves: &[InventoryMove]) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE production_order
            SET handoff_moves = ?2, updated_at = datetime('now')
            WHERE order_id = ?1
            "#,
            params![order_id, serde_json::to_string(moves)?],
        )?;
        ensure_found(affected, order_id)
    }
}

// ==========================================
// 事务内辅助函数
// ==========================================

fn ensure_found(affected: usize, order_id: i64) -> RepositoryResult<()> {
    if affected == 0 {
        return Err(RepositoryError::NotFound {
            entity: "production_order".to_string(),
            id: order_id.to_string(),
        });
    }
    Ok(())
}

fn format_datetime(value: Option<NaiveDateTime>) -> Option<String> {
    value.map(|dt| dt.format(DATETIME_FMT).to_string())
}

fn parse_datetime(field: &str, value: Option<String>) -> RepositoryResult<Option<NaiveDateTime>> {
    match value {
        None => Ok(None),
        Some(s) => NaiveDateTime::parse_from_str(&s, DATETIME_FMT)
            .map(Some)
            .map_err(|e| RepositoryError::FieldValueError {
                field: field.to_string(),
                message: format!("时间格式错误 '{}': {}", s, e),
            }),
    }
}

/// 原始行（先取出列值，再在 rusqlite 闭包外做 JSON/枚举解析，以便返回仓储错误）
struct RawOrderRow {
    order_id: i64,
    order_no: String,
    status: String,
    quantity: f64,
    rows_json: String,
    production_shelf_id: Option<i64>,
    production_moves_json: String,
    handoff_moves_json: String,
    started_at: Option<String>,
    stopped_at: Option<String>,
    completed_at: Option<String>,
    output_product_id: Option<i64>,
    output_shelf_id: Option<i64>,
    output_quantity: Option<f64>,
}

impl RawOrderRow {
    fn into_order(self) -> RepositoryResult<ProductionOrder> {
        let status = ProductionStatus::from_db_str(&self.status).ok_or_else(|| {
            RepositoryError::FieldValueError {
                field: "status".to_string(),
                message: format!("未知工单状态: {}", self.status),
            }
        })?;

        Ok(ProductionOrder {
            order_id: self.order_id,
            order_no: self.order_no,
            status,
            quantity: self.quantity,
            material_requirement_rows: serde_json::from_str(&self.rows_json)?,
            production_shelf_id: self.production_shelf_id,
            production_moves: serde_json::from_str(&self.production_moves_json)?,
            handoff_moves: serde_json::from_str(&self.handoff_moves_json)?,
            started_at: parse_datetime("started_at", self.started_at)?,
            stopped_at: parse_datetime("stopped_at", self.stopped_at)?,
            completed_at: parse_datetime("completed_at", self.completed_at)?,
            output_product_id: self.output_product_id,
            output_shelf_id: self.output_shelf_id,
            output_quantity: self.output_quantity,
        })
    }
}

pub(crate) fn find_by_id_in_conn(
    conn: &Connection,
    order_id: i64,
) -> RepositoryResult<Option<ProductionOrder>> {
    let sql = format!("{} WHERE order_id = ?1", SELECT_COLUMNS);
    let raw = conn
        .query_row(&sql, params![order_id], |row| {
            Ok(RawOrderRow {
                order_id: row.get(0)?,
                order_no: row.get(1)?,
                status: row.get(2)?,
                quantity: row.get(3)?,
                rows_json: row.get(4)?,
                production_shelf_id: row.get(5)?,
                production_moves_json: row.get(6)?,
                handoff_moves_json: row.get(7)?,
                started_at: row.get(8)?,
                stopped_at: row.get(9)?,
                completed_at: row.get(10)?,
                output_product_id: row.get(11)?,
                output_shelf_id: row.get(12)?,
                output_quantity: row.get(13)?,
            })
        })
        .optional()?;

    raw.map(RawOrderRow::into_order).transpose()
}

/// 带状态守卫的整单更新
///
/// 仅当库中状态仍为 expected_status 时写入；否则返回 InvalidStateTransition，
/// 调用方事务随之回滚
pub(crate) fn update_with_status_guard_in_tx(
    conn: &Connection,
    order: &ProductionOrder,
    expected_status: ProductionStatus,
) -> RepositoryResult<()> {
    let affected = conn.execute(
        r#"
        UPDATE production_order SET
            status = ?3,
            quantity = ?4,
            material_requirement_rows = ?5,
            production_shelf_id = ?6,
            production_moves = ?7,
            handoff_moves = ?8,
            started_at = ?9,
            stopped_at = ?10,
            completed_at = ?11,
            output_product_id = ?12,
            output_shelf_id = ?13,
            output_quantity = ?14,
            updated_at = datetime('now')
        WHERE order_id = ?1 AND status = ?2
        "#,
        params![
            order.order_id,
            expected_status.to_db_str(),
            order.status.to_db_str(),
            order.quantity,
            serde_json::to_string(&order.material_requirement_rows)?,
            order.production_shelf_id,
            serde_json::to_string(&order.production_moves)?,
            serde_json::to_string(&order.handoff_moves)?,
            format_datetime(order.started_at),
            format_datetime(order.stopped_at),
            format_datetime(order.completed_at),
            order.output_product_id,
            order.output_shelf_id,
            order.output_quantity,
        ],
    )?;

    if affected == 0 {
        let actual: Option<String> = conn
            .query_row(
                "SELECT status FROM production_order WHERE order_id = ?1",
                params![order.order_id],
                |row| row.get(0),
            )
            .optional()?;
        return match actual {
            None => Err(RepositoryError::NotFound {
                entity: "production_order".to_string(),
                id: order.order_id.to_string(),
            }),
            Some(actual) => Err(RepositoryError::InvalidStateTransition {
                order_id: order.order_id,
                expected: expected_status.to_string(),
                actual,
            }),
        };
    }
    Ok(())
}
