// ==========================================
// 生产领料与库存移动引擎 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键、busy_timeout）
// - 提供幂等的建表入口，库存与工单表结构集中在此处
// ==========================================

use rusqlite::Connection;
use std::path::PathBuf;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 数据库路径环境变量
pub const DB_PATH_ENV: &str = "PRODUCTION_INVENTORY_DB_PATH";

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 初始化数据库表结构（幂等）
///
/// 红线: shelf_stock.stock 由 CHECK 约束兜底，任何路径都不能写入负库存
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS category (
            code TEXT PRIMARY KEY,
            label TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS product (
            product_id INTEGER PRIMARY KEY,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            category_code TEXT,
            main_unit TEXT,
            sub_unit TEXT,
            sub_unit_ratio REAL,
            stock REAL NOT NULL DEFAULT 0,
            sub_stock REAL
        );

        CREATE TABLE IF NOT EXISTS warehouse (
            warehouse_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS shelf (
            shelf_id INTEGER PRIMARY KEY,
            warehouse_id INTEGER NOT NULL REFERENCES warehouse(warehouse_id),
            name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS shelf_stock (
            product_id INTEGER NOT NULL REFERENCES product(product_id),
            shelf_id INTEGER NOT NULL REFERENCES shelf(shelf_id),
            warehouse_id INTEGER NOT NULL REFERENCES warehouse(warehouse_id),
            stock REAL NOT NULL DEFAULT 0 CHECK (stock >= 0),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (product_id, shelf_id)
        );

        CREATE TABLE IF NOT EXISTS production_order (
            order_id INTEGER PRIMARY KEY,
            order_no TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            quantity REAL NOT NULL DEFAULT 1,
            material_requirement_rows TEXT NOT NULL DEFAULT '[]',
            production_shelf_id INTEGER,
            production_moves TEXT NOT NULL DEFAULT '[]',
            handoff_moves TEXT NOT NULL DEFAULT '[]',
            started_at TEXT,
            stopped_at TEXT,
            completed_at TEXT,
            output_product_id INTEGER,
            output_shelf_id INTEGER,
            output_quantity REAL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )
}

/// 获取默认数据库路径
///
/// # 返回
/// - 环境变量 PRODUCTION_INVENTORY_DB_PATH 非空时直接使用
/// - 否则: 用户数据目录/production-inventory/production_inventory.db
/// - 取不到用户数据目录时回退到 ./production_inventory.db
pub fn get_default_db_path() -> String {
    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./production_inventory.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("production-inventory");
        // best-effort: 建目录失败时由后续 open 报错
        std::fs::create_dir_all(&dir).ok();
        path = dir.join("production_inventory.db");
    }

    path.to_string_lossy().to_string()
}
