// ==========================================
// 生产领料与库存移动引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::db::open_sqlite_connection;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

// ==========================================
// EngineConfig - 引擎运行参数
// ==========================================

/// 库存容差上限: 容差只用于吸收浮点误差，超过此值视为配置错误
pub const MAX_STOCK_EPSILON: f64 = 1e-3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 库存与零比较的浮点容差
    pub stock_epsilon: f64,
    /// 分摊守恒自检的相对容差
    pub allocation_tolerance: f64,
    /// 草稿存在未归集需求行时是否阻止开工
    pub block_on_unresolved_rows: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stock_epsilon: 1e-9,
            allocation_tolerance: 1e-6,
            block_on_unresolved_rows: false,
        }
    }
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入配置值（UPSERT）
    pub fn set_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value, updated_at)
            VALUES ('global', ?1, ?2, datetime('now'))
            ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    /// 获取所有配置的快照（JSON格式）
    pub fn get_config_snapshot(&self) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let mut config_map: HashMap<String, String> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        Ok(serde_json::to_string(&json!(config_map))?)
    }

    /// 读取 f64 配置，缺失或格式错误时回退默认值
    fn get_f64_or_default(&self, key: &str, default: f64) -> RepositoryResult<f64> {
        match self.get_config_value(key)? {
            None => Ok(default),
            Some(raw) => match raw.trim().parse::<f64>() {
                Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
                _ => {
                    warn!(key, value = %raw, "配置值无效，使用默认值 {}", default);
                    Ok(default)
                }
            },
        }
    }

    /// 读取 bool 配置（接受 true/false/1/0）
    fn get_bool_or_default(&self, key: &str, default: bool) -> RepositoryResult<bool> {
        match self.get_config_value(key)? {
            None => Ok(default),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => {
                    warn!(key, value = %raw, "配置值无效，使用默认值 {}", default);
                    Ok(default)
                }
            },
        }
    }

    /// 加载引擎运行参数
    pub fn load_engine_config(&self) -> RepositoryResult<EngineConfig> {
        let defaults = EngineConfig::default();
        let stock_epsilon =
            match self.get_f64_or_default(config_keys::STOCK_EPSILON, defaults.stock_epsilon)? {
                eps if eps <= MAX_STOCK_EPSILON => eps,
                eps => {
                    warn!(
                        key = config_keys::STOCK_EPSILON,
                        value = eps,
                        max = MAX_STOCK_EPSILON,
                        "库存容差超过上限，使用默认值 {}",
                        defaults.stock_epsilon
                    );
                    defaults.stock_epsilon
                }
            };

        Ok(EngineConfig {
            stock_epsilon,
            allocation_tolerance: self.get_f64_or_default(
                config_keys::ALLOCATION_TOLERANCE,
                defaults.allocation_tolerance,
            )?,
            block_on_unresolved_rows: self.get_bool_or_default(
                config_keys::BLOCK_ON_UNRESOLVED_ROWS,
                defaults.block_on_unresolved_rows,
            )?,
        })
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 库存
    pub const STOCK_EPSILON: &str = "inventory.stock_epsilon";

    // 分摊
    pub const ALLOCATION_TOLERANCE: &str = "allocation.tolerance";

    // 开工
    pub const BLOCK_ON_UNRESOLVED_ROWS: &str = "production.block_on_unresolved_rows";
}
