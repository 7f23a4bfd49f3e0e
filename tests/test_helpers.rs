// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 提供测试所需的数据库初始化、基础数据与工单构造
// ==========================================
#![allow(dead_code)]

use production_inventory::db::{init_schema, open_sqlite_connection};
use production_inventory::domain::{MaterialRequirementRow, PieceRequirement, ProductionOrder};
use production_inventory::repository::ProductionOrderRepository;
use rusqlite::{params, Connection};
use std::error::Error;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

// ===== 基础数据常量 =====
pub const WAREHOUSE_RAW: i64 = 1;
pub const WAREHOUSE_FINISHED: i64 = 2;

/// 原料货架
pub const SHELF_A: i64 = 10;
/// 产线货架
pub const SHELF_B: i64 = 20;
/// 成品货架（成品仓）
pub const SHELF_C: i64 = 30;

/// 原料: 板材（辅单位比例 2.0）
pub const PRODUCT_P: i64 = 1;
/// 成品
pub const PRODUCT_Q: i64 = 2;
/// 原料: 封边条
pub const PRODUCT_E: i64 = 3;

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file
        .path()
        .to_str()
        .ok_or("临时文件路径不是合法 UTF-8")?
        .to_string();

    let conn = open_sqlite_connection(&db_path)?;
    init_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 打开测试数据库连接
pub fn open_test_connection(db_path: &str) -> Result<Connection, Box<dyn Error>> {
    Ok(open_sqlite_connection(db_path)?)
}

/// 打开共享连接（供仓储 from_connection 使用）
pub fn shared_connection(db_path: &str) -> Result<Arc<Mutex<Connection>>, Box<dyn Error>> {
    Ok(Arc::new(Mutex::new(open_test_connection(db_path)?)))
}

/// 插入仓库、货架、类别、商品
pub fn seed_catalog(conn: &Connection) -> Result<(), Box<dyn Error>> {
    conn.execute(
        "INSERT INTO warehouse (warehouse_id, name) VALUES (?1, '原料仓'), (?2, '成品仓')",
        params![WAREHOUSE_RAW, WAREHOUSE_FINISHED],
    )?;
    conn.execute(
        r#"
        INSERT INTO shelf (shelf_id, warehouse_id, name) VALUES
            (?1, ?4, 'A-原料'),
            (?2, ?4, 'B-产线'),
            (?3, ?5, 'C-成品')
        "#,
        params![SHELF_A, SHELF_B, SHELF_C, WAREHOUSE_RAW, WAREHOUSE_FINISHED],
    )?;
    conn.execute(
        "INSERT INTO category (code, label) VALUES ('board', '板材'), ('edge', '封边'), ('finished', '成品')",
        [],
    )?;
    conn.execute(
        r#"
        INSERT INTO product (product_id, code, name, category_code, main_unit, sub_unit, sub_unit_ratio, stock)
        VALUES
            (?1, 'P-001', '颗粒板', 'board', 'm2', '张', 2.0, 0),
            (?2, 'Q-001', '衣柜', 'finished', '件', NULL, NULL, 0),
            (?3, 'E-001', '封边条', 'edge', 'm', NULL, NULL, 0)
        "#,
        params![PRODUCT_P, PRODUCT_Q, PRODUCT_E],
    )?;
    Ok(())
}

/// 设定货架库存并同步商品库存缓存
pub fn seed_stock(
    conn: &Connection,
    product_id: i64,
    shelf_id: i64,
    stock: f64,
) -> Result<(), Box<dyn Error>> {
    conn.execute(
        r#"
        INSERT INTO shelf_stock (product_id, shelf_id, warehouse_id, stock)
        SELECT ?1, shelf_id, warehouse_id, ?3 FROM shelf WHERE shelf_id = ?2
        ON CONFLICT(product_id, shelf_id) DO UPDATE SET stock = excluded.stock
        "#,
        params![product_id, shelf_id, stock],
    )?;
    conn.execute(
        r#"
        UPDATE product
        SET stock = (SELECT COALESCE(SUM(stock), 0) FROM shelf_stock WHERE product_id = ?1)
        WHERE product_id = ?1
        "#,
        params![product_id],
    )?;
    Ok(())
}

/// 直接读取货架库存（无记录返回 0）
pub fn read_stock(conn: &Connection, product_id: i64, shelf_id: i64) -> Result<f64, Box<dyn Error>> {
    let stock: Option<f64> = conn
        .query_row(
            "SELECT stock FROM shelf_stock WHERE product_id = ?1 AND shelf_id = ?2",
            params![product_id, shelf_id],
            |row| row.get(0),
        )
        .ok();
    Ok(stock.unwrap_or(0.0))
}

/// 构造单个部件（长宽数量均为 1，交付行默认交付量为 1）
pub fn piece(name: &str, per_item_usage: f64) -> PieceRequirement {
    PieceRequirement {
        name: name.to_string(),
        length: 1.0,
        width: 1.0,
        quantity: 1.0,
        main_unit: Some("m2".to_string()),
        per_item_usage: Some(per_item_usage),
        ..Default::default()
    }
}

/// 构造需求行
pub fn requirement_row(
    row_key: &str,
    category: &str,
    product_id: Option<i64>,
    pieces: Vec<PieceRequirement>,
) -> MaterialRequirementRow {
    MaterialRequirementRow {
        row_key: Some(row_key.to_string()),
        category: category.to_string(),
        selected_product_id: product_id,
        pieces,
        ..Default::default()
    }
}

/// 构造待生产工单
pub fn build_order(
    order_id: i64,
    quantity: f64,
    rows: Vec<MaterialRequirementRow>,
) -> ProductionOrder {
    let mut order = ProductionOrder::new(order_id, &format!("MO-{:04}", order_id), quantity);
    order.material_requirement_rows = rows;
    order
}

/// 写入工单
pub fn insert_order(db_path: &str, order: &ProductionOrder) -> Result<(), Box<dyn Error>> {
    let repo = ProductionOrderRepository::new(db_path)?;
    repo.insert(order)?;
    Ok(())
}

/// 标准场景: 基础数据 + 原料货架 A 上 100 单位颗粒板
pub fn setup_standard_scenario() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let (temp_file, db_path) = create_test_db()?;
    let conn = open_test_connection(&db_path)?;
    seed_catalog(&conn)?;
    seed_stock(&conn, PRODUCT_P, SHELF_A, 100.0)?;
    Ok((temp_file, db_path))
}
