use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tauri::{AppHandle, Manager};
use uuid::Uuid;

const DEFAULT_LEDGER_DB_RELATIVE_PATH: &str = "ledger/itemledger.db";

const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_init.sql",
    include_str!("../db/migrations/0001_init.sql"),
)];

/// Canonical trade record. Built once during import, never mutated afterwards;
/// the only destructive operation is a full clear.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRecord {
    pub date: String,
    pub item_name: String,
    pub status: TradeStatus,
    pub cost: f64,
    pub sell_amount: f64,
    pub profit: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Stock,
    Sell,
    Consume,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Stock => "stock",
            TradeStatus::Sell => "sell",
            TradeStatus::Consume => "consume",
        }
    }

    pub(crate) fn from_db(raw: &str) -> Result<Self, String> {
        match raw {
            "stock" => Ok(TradeStatus::Stock),
            "sell" => Ok(TradeStatus::Sell),
            "consume" => Ok(TradeStatus::Consume),
            other => Err(format!("未知交易状态: {other}")),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LedgerDbStatus {
    pub db_path: String,
    pub exists: bool,
    pub applied_versions: Vec<String>,
    pub pending_versions: Vec<String>,
    pub ready: bool,
}

#[derive(Debug, Serialize)]
pub struct LedgerDbMigrateResult {
    pub db_path: String,
    pub created: bool,
    pub applied_now: Vec<String>,
    pub applied_total: usize,
}

#[derive(Debug, Serialize)]
pub struct ClearTransactionsResult {
    pub db_path: String,
    pub deleted_rows: usize,
}

pub(crate) fn resolve_ledger_db_path(app: &AppHandle) -> Result<PathBuf, String> {
    let base = app
        .path()
        .app_local_data_dir()
        .map_err(|e| format!("无法解析 app_local_data_dir: {e}"))?;
    Ok(base.join(DEFAULT_LEDGER_DB_RELATIVE_PATH))
}

pub(crate) fn open_ledger_db(db_path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(db_path).map_err(|e| format!("打开数据库失败: {e}"))?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|e| format!("设置 foreign_keys 失败: {e}"))?;
    Ok(conn)
}

fn ensure_schema_migrations_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )
}

fn load_applied_versions(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version ASC")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut versions = Vec::new();
    for row in rows {
        versions.push(row?);
    }
    Ok(versions)
}

fn inspect_status_at_path(db_path: &Path) -> Result<LedgerDbStatus, String> {
    let migration_files = MIGRATIONS
        .iter()
        .map(|(v, _)| (*v).to_string())
        .collect::<Vec<_>>();
    if !db_path.exists() {
        return Ok(LedgerDbStatus {
            db_path: db_path.to_string_lossy().to_string(),
            exists: false,
            applied_versions: Vec::new(),
            pending_versions: migration_files,
            ready: false,
        });
    }

    let conn = open_ledger_db(db_path)?;
    let schema_table_exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_migrations')",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|v| v != 0)
        .map_err(|e| format!("检查 schema_migrations 失败: {e}"))?;

    let applied_versions = if schema_table_exists {
        load_applied_versions(&conn).map_err(|e| format!("读取 schema_migrations 失败: {e}"))?
    } else {
        Vec::new()
    };
    let applied_set = applied_versions.iter().cloned().collect::<HashSet<_>>();
    let pending_versions = migration_files
        .into_iter()
        .filter(|v| !applied_set.contains(v))
        .collect::<Vec<_>>();

    Ok(LedgerDbStatus {
        db_path: db_path.to_string_lossy().to_string(),
        exists: true,
        applied_versions,
        pending_versions: pending_versions.clone(),
        ready: pending_versions.is_empty(),
    })
}

pub(crate) fn apply_embedded_migrations(db_path: &Path) -> Result<LedgerDbMigrateResult, String> {
    let created = !db_path.exists();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("创建数据库目录失败: {e}"))?;
    }

    let mut conn = open_ledger_db(db_path)?;
    ensure_schema_migrations_table(&conn)
        .map_err(|e| format!("初始化 schema_migrations 失败: {e}"))?;

    let already = load_applied_versions(&conn)
        .map_err(|e| format!("读取已应用迁移失败: {e}"))?
        .into_iter()
        .collect::<HashSet<_>>();

    let mut applied_now = Vec::new();
    for (version, sql) in MIGRATIONS {
        if already.contains(*version) {
            continue;
        }
        let tx = conn
            .transaction()
            .map_err(|e| format!("开始迁移事务失败 ({version}): {e}"))?;
        tx.execute_batch(sql)
            .map_err(|e| format!("执行迁移失败 ({version}): {e}"))?;
        tx.execute(
            "INSERT INTO schema_migrations(version) VALUES (?1)",
            [*version],
        )
        .map_err(|e| format!("写入 schema_migrations 失败 ({version}): {e}"))?;
        tx.commit()
            .map_err(|e| format!("提交迁移事务失败 ({version}): {e}"))?;
        applied_now.push((*version).to_string());
    }

    let applied_total = load_applied_versions(&conn)
        .map_err(|e| format!("读取迁移结果失败: {e}"))?
        .len();

    Ok(LedgerDbMigrateResult {
        db_path: db_path.to_string_lossy().to_string(),
        created,
        applied_now,
        applied_total,
    })
}

/// Inserts the accepted set of one import call as a single batch. Any insert
/// failure rolls the whole batch back, so the store never holds a partial
/// import.
pub(crate) fn insert_trade_records(
    conn: &Connection,
    records: &[TradeRecord],
    source_file: Option<&str>,
    import_job_id: Option<&str>,
) -> Result<usize, String> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| format!("开始批量写入事务失败: {e}"))?;
    {
        let mut stmt = tx
            .prepare(
                r#"
                INSERT INTO transactions(
                    id, date, item_name, status, cost, sell_amount, profit,
                    source_file, import_job_id
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .map_err(|e| format!("准备交易写入语句失败: {e}"))?;
        for record in records {
            stmt.execute(params![
                Uuid::new_v4().to_string(),
                record.date,
                record.item_name,
                record.status.as_str(),
                record.cost,
                record.sell_amount,
                record.profit,
                source_file,
                import_job_id,
            ])
            .map_err(|e| format!("写入交易记录失败: {e}"))?;
        }
    }
    tx.commit()
        .map_err(|e| format!("提交批量写入事务失败: {e}"))?;
    Ok(records.len())
}

/// Materializes the full record set in insertion order. Rowid order is the
/// tie-break contract the ranking views rely on.
pub(crate) fn load_all_trade_records(conn: &Connection) -> Result<Vec<TradeRecord>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT date, item_name, status, cost, sell_amount, profit
             FROM transactions ORDER BY rowid ASC",
        )
        .map_err(|e| format!("准备交易查询失败: {e}"))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
            ))
        })
        .map_err(|e| format!("查询交易记录失败: {e}"))?;

    let mut records = Vec::new();
    for row in rows {
        let (date, item_name, status_raw, cost, sell_amount, profit) =
            row.map_err(|e| format!("读取交易记录失败: {e}"))?;
        records.push(TradeRecord {
            date,
            item_name,
            status: TradeStatus::from_db(&status_raw)?,
            cost,
            sell_amount,
            profit,
        });
    }
    Ok(records)
}

pub fn clear_transactions_at_db_path(db_path: &Path) -> Result<ClearTransactionsResult, String> {
    if !db_path.exists() {
        return Err(format!("数据库不存在: {}", db_path.to_string_lossy()));
    }
    let conn = open_ledger_db(db_path)?;
    let deleted_rows = conn
        .execute("DELETE FROM transactions", [])
        .map_err(|e| format!("清空交易记录失败: {e}"))?;
    Ok(ClearTransactionsResult {
        db_path: db_path.to_string_lossy().to_string(),
        deleted_rows,
    })
}

#[tauri::command]
pub fn ledger_db_status(app: AppHandle) -> Result<LedgerDbStatus, String> {
    let db_path = resolve_ledger_db_path(&app)?;
    inspect_status_at_path(&db_path)
}

#[tauri::command]
pub fn ledger_db_migrate(app: AppHandle) -> Result<LedgerDbMigrateResult, String> {
    let db_path = resolve_ledger_db_path(&app)?;
    apply_embedded_migrations(&db_path)
}

#[tauri::command]
pub fn clear_all_transactions(app: AppHandle) -> Result<ClearTransactionsResult, String> {
    let db_path = resolve_ledger_db_path(&app)?;
    clear_transactions_at_db_path(&db_path)
}
