use calamine::{open_workbook_auto, Reader};
use chrono::{Duration, NaiveDate, SecondsFormat, Utc};
use regex::Regex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;
use tauri::AppHandle;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::ledger_db::{
    insert_trade_records, open_ledger_db, resolve_ledger_db_path, TradeRecord, TradeStatus,
};

const DEFAULT_SOURCE_TYPE: &str = "market_export";

/// Largest spreadsheet day serial we accept (9999-12-31 in the 1900 system).
const MAX_DATE_SERIAL: f64 = 2_958_466.0;

#[derive(Debug)]
struct AliasSpec {
    field: &'static str,
    aliases: &'static [&'static str],
}

// One spec per logical field; aliases are tried in priority order per row, so
// a row with an empty sell-time cell still falls through to the purchase time.
const FIELD_ALIAS_SPECS: &[AliasSpec] = &[
    AliasSpec {
        field: "date",
        aliases: &["出售时间", "Date", "时间", "购买时间"],
    },
    AliasSpec {
        field: "item_name",
        aliases: &["Item Name", "item_name", "饰品名称", "道具名称"],
    },
    AliasSpec {
        field: "cost",
        aliases: &["Price", "价格", "金额"],
    },
    AliasSpec {
        field: "sell_amount",
        aliases: &["出售金额", "Sell Amount"],
    },
    AliasSpec {
        field: "status",
        aliases: &["Type", "类型", "状态"],
    },
];

const REQUIRED_HEADER_FIELDS: &[&str] = &["date", "item_name"];

#[derive(Debug, Deserialize)]
pub struct MarketPreviewRequest {
    pub source_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MarketImportRequest {
    pub source_path: Option<String>,
    pub source_type: Option<String>,
}

/// Diagnostic record for a row the validator refused. Lives only in the
/// preview response and the import-job error samples.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedRow {
    pub index: usize,
    pub original: BTreeMap<String, String>,
    pub parsed: Value,
    pub reason: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct ParsedMarketFile {
    pub accepted: Vec<TradeRecord>,
    pub rejected: Vec<RejectedRow>,
    pub mapping: BTreeMap<String, String>,
    pub total_rows: usize,
}

enum RowOutcome {
    Accepted(TradeRecord),
    Rejected(RejectedRow),
}

fn trim_cell(text: &str) -> String {
    text.trim()
        .trim_start_matches('\u{feff}')
        .trim()
        .to_string()
}

fn normalize_key(key: &str) -> String {
    trim_cell(key)
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

fn compact_dot_datetime_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{4})\.(\d{2})\.(\d{2})(\d{2}):(\d{2}):(\d{2})")
            .expect("invalid compact dot datetime regex")
    })
}

fn spaced_dot_datetime_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{4})\.(\d{2})\.(\d{2})\s+(\d{2}):(\d{2}):(\d{2})")
            .expect("invalid spaced dot datetime regex")
    })
}

fn slash_datetime_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{1,2})/(\d{1,2})/(\d{4})\s+(\d{1,2}):(\d{2})")
            .expect("invalid slash datetime regex")
    })
}

fn iso_datetime_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{4})-(\d{2})-(\d{2})(?:T|\s+)(\d{2}):(\d{2})")
            .expect("invalid iso datetime regex")
    })
}

fn price_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\d,.]+").expect("invalid price run regex"))
}

fn cap_u32(caps: &regex::Captures, group: usize) -> Option<u32> {
    caps.get(group)?.as_str().parse().ok()
}

fn format_minute(year: u32, month: u32, day: u32, hour: u32, minute: u32) -> Option<String> {
    NaiveDate::from_ymd_opt(year as i32, month, day)?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some(format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}"))
}

fn serial_to_minute(serial: f64) -> Option<String> {
    if !serial.is_finite() || !(0.0..MAX_DATE_SERIAL).contains(&serial) {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let moment = base.checked_add_signed(Duration::seconds((serial * 86_400.0).round() as i64))?;
    Some(moment.format("%Y-%m-%d %H:%M").to_string())
}

/// Normalizes a raw date cell to `YYYY-MM-DD HH:mm`, or `None` when no
/// recognizer matches. A cell that is entirely numeric is a spreadsheet day
/// serial anchored at 1899-12-30, fractional days carrying the time of day.
/// String cells try the known export layouts in priority order; seconds are
/// always dropped.
pub(crate) fn parse_trade_date(raw: &str) -> Option<String> {
    let text = trim_cell(raw);
    if text.is_empty() {
        return None;
    }
    if let Ok(serial) = text.parse::<f64>() {
        return serial_to_minute(serial);
    }

    let dotted = compact_dot_datetime_re()
        .captures(&text)
        .or_else(|| spaced_dot_datetime_re().captures(&text));
    if let Some(caps) = dotted {
        return format_minute(
            cap_u32(&caps, 1)?,
            cap_u32(&caps, 2)?,
            cap_u32(&caps, 3)?,
            cap_u32(&caps, 4)?,
            cap_u32(&caps, 5)?,
        );
    }
    if let Some(caps) = slash_datetime_re().captures(&text) {
        return format_minute(
            cap_u32(&caps, 3)?,
            cap_u32(&caps, 1)?,
            cap_u32(&caps, 2)?,
            cap_u32(&caps, 4)?,
            cap_u32(&caps, 5)?,
        );
    }
    if let Some(caps) = iso_datetime_re().captures(&text) {
        return format_minute(
            cap_u32(&caps, 1)?,
            cap_u32(&caps, 2)?,
            cap_u32(&caps, 3)?,
            cap_u32(&caps, 4)?,
            cap_u32(&caps, 5)?,
        );
    }
    None
}

/// Extracts a price from a raw cell. A cell that parses as a number passes
/// through unchanged; otherwise the first run of digits, dots and commas is
/// taken with commas stripped as thousands separators.
pub(crate) fn parse_price(raw: &str) -> Option<f64> {
    let text = trim_cell(raw);
    if text.is_empty() {
        return None;
    }
    if let Ok(value) = text.parse::<f64>() {
        return value.is_finite().then_some(value);
    }
    let run = price_run_re().find(&text)?.as_str().replace(',', "");
    run.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Maps a free-text status cell onto the three canonical kinds. Containment,
/// not equality: the sources mix free text with the keyword. An item with no
/// recorded disposition is inventory.
pub(crate) fn classify_status(raw: &str) -> TradeStatus {
    let normalized = raw.trim().to_lowercase();
    if normalized.is_empty() {
        return TradeStatus::Stock;
    }
    if normalized.contains("出售") || normalized.contains("sell") {
        return TradeStatus::Sell;
    }
    if normalized.contains("消耗") || normalized.contains("consume") {
        return TradeStatus::Consume;
    }
    TradeStatus::Stock
}

/// Trims, collapses internal whitespace and NFC-composes an item name so
/// that names differing only in whitespace or normalization form collide.
pub(crate) fn clean_item_name(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    Some(collapsed.nfc().collect::<String>())
}

/// Maps each logical field onto every header column one of its aliases
/// matched, in alias priority order.
fn resolve_alias_columns(header: &[String]) -> HashMap<&'static str, Vec<usize>> {
    let mut normalized: HashMap<String, usize> = HashMap::new();
    for (idx, cell) in header.iter().enumerate() {
        let key = normalize_key(cell);
        if !key.is_empty() {
            normalized.entry(key).or_insert(idx);
        }
    }

    let mut mapping: HashMap<&'static str, Vec<usize>> = HashMap::new();
    for spec in FIELD_ALIAS_SPECS {
        let mut columns = Vec::new();
        for alias in spec.aliases {
            if let Some(idx) = normalized.get(&normalize_key(alias)) {
                if !columns.contains(idx) {
                    columns.push(*idx);
                }
            }
        }
        if !columns.is_empty() {
            mapping.insert(spec.field, columns);
        }
    }
    mapping
}

fn find_header_row(
    rows: &[Vec<String>],
) -> Result<(usize, HashMap<&'static str, Vec<usize>>), String> {
    'outer: for (idx, row) in rows.iter().enumerate() {
        let mapping = resolve_alias_columns(row);
        for req in REQUIRED_HEADER_FIELDS {
            if !mapping.contains_key(*req) {
                continue 'outer;
            }
        }
        return Ok((idx, mapping));
    }
    Err(format!(
        "未找到必要表头: {}",
        REQUIRED_HEADER_FIELDS.join(", ")
    ))
}

/// First candidate column holding a non-empty cell on this row, in alias
/// priority order.
fn resolve_field(
    row: &[String],
    columns: &HashMap<&'static str, Vec<usize>>,
    field: &str,
) -> Option<String> {
    for idx in columns.get(field)? {
        if let Some(cell) = row.get(*idx) {
            let cell = trim_cell(cell);
            if !cell.is_empty() {
                return Some(cell);
            }
        }
    }
    None
}

fn mapping_headers(
    header: &[String],
    columns: &HashMap<&'static str, Vec<usize>>,
) -> BTreeMap<String, String> {
    let mut mapping = BTreeMap::new();
    for (field, indices) in columns {
        let headers = indices
            .iter()
            .filter_map(|idx| header.get(*idx))
            .map(|h| trim_cell(h))
            .collect::<Vec<_>>();
        mapping.insert((*field).to_string(), headers.join(" / "));
    }
    mapping
}

fn build_trade_row(
    row: &[String],
    columns: &HashMap<&'static str, Vec<usize>>,
    header: &[String],
    line_no: usize,
) -> RowOutcome {
    let date = resolve_field(row, columns, "date")
        .as_deref()
        .and_then(parse_trade_date);
    let item_name = resolve_field(row, columns, "item_name")
        .as_deref()
        .and_then(clean_item_name);
    let cost = resolve_field(row, columns, "cost")
        .as_deref()
        .and_then(parse_price);
    let sell_amount = resolve_field(row, columns, "sell_amount")
        .as_deref()
        .and_then(parse_price);
    let status = classify_status(
        resolve_field(row, columns, "status")
            .as_deref()
            .unwrap_or(""),
    );

    let profit = match status {
        TradeStatus::Sell => sell_amount
            .map(|amount| amount - cost.unwrap_or(0.0))
            .unwrap_or(0.0),
        TradeStatus::Consume => -cost.unwrap_or(0.0),
        TradeStatus::Stock => 0.0,
    };

    if let (Some(date), Some(item_name), Some(cost)) = (date.clone(), item_name.clone(), cost) {
        return RowOutcome::Accepted(TradeRecord {
            date,
            item_name,
            status,
            cost,
            sell_amount: sell_amount.unwrap_or(0.0),
            profit,
        });
    }

    let mut original = BTreeMap::new();
    for (idx, cell) in row.iter().enumerate() {
        let cell = trim_cell(cell);
        if cell.is_empty() {
            continue;
        }
        let key = header
            .get(idx)
            .map(|h| trim_cell(h))
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| format!("col_{idx}"));
        original.entry(key).or_insert(cell);
    }
    let parsed = json!({
        "date": date,
        "item_name": item_name,
        "status": status.as_str(),
        "cost": cost.unwrap_or(0.0),
        "sell_amount": sell_amount.unwrap_or(0.0),
        "profit": profit,
    });
    let mut reason = BTreeMap::new();
    reason.insert(
        "date".to_string(),
        if date.is_none() { "日期解析失败" } else { "✓" }.to_string(),
    );
    reason.insert(
        "item_name".to_string(),
        if item_name.is_none() { "饰品名称为空" } else { "✓" }.to_string(),
    );
    reason.insert("status".to_string(), "✓".to_string());
    reason.insert(
        "cost".to_string(),
        if cost.is_none() { "成本解析失败" } else { "✓" }.to_string(),
    );

    RowOutcome::Rejected(RejectedRow {
        index: line_no,
        original,
        parsed,
        reason,
    })
}

/// Partitions the tokenized rows into accepted records and rejected
/// diagnostics. Pure: running it twice over the same rows yields identical
/// partitions.
fn parse_market_rows(rows: &[Vec<String>]) -> Result<ParsedMarketFile, String> {
    let (header_idx, columns) = find_header_row(rows)?;
    let header = &rows[header_idx];
    let mapping = mapping_headers(header, &columns);

    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    let mut total_rows = 0usize;

    for (offset, row) in rows[(header_idx + 1)..].iter().enumerate() {
        if row.iter().all(|c| trim_cell(c).is_empty()) {
            continue;
        }
        total_rows += 1;
        let line_no = header_idx + 2 + offset;
        match build_trade_row(row, &columns, header, line_no) {
            RowOutcome::Accepted(record) => accepted.push(record),
            RowOutcome::Rejected(diagnostic) => rejected.push(diagnostic),
        }
    }

    Ok(ParsedMarketFile {
        accepted,
        rejected,
        mapping,
        total_rows,
    })
}

fn read_csv_rows(path: &Path) -> Result<Vec<Vec<String>>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| format!("读取 CSV 失败: {e}"))?;

    let mut rows = Vec::new();
    for rec in reader.records() {
        let rec = rec.map_err(|e| format!("读取 CSV 行失败: {e}"))?;
        rows.push(rec.iter().map(trim_cell).collect());
    }
    Ok(rows)
}

fn read_workbook_rows(path: &Path) -> Result<Vec<Vec<String>>, String> {
    let mut workbook = open_workbook_auto(path).map_err(|e| format!("打开工作簿失败: {e}"))?;
    let sheet_names = workbook.sheet_names().to_owned();
    let first_sheet = sheet_names
        .first()
        .cloned()
        .ok_or_else(|| "工作簿中未找到工作表".to_string())?;

    let range = workbook
        .worksheet_range(&first_sheet)
        .map_err(|e| format!("读取工作表失败: {e}"))?;

    let rows = range
        .rows()
        .map(|row| {
            row.iter()
                .map(|cell| trim_cell(&cell.to_string()))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    Ok(rows)
}

pub fn parse_market_file(file_path: &Path) -> Result<ParsedMarketFile, String> {
    if !file_path.exists() {
        return Err(format!("未找到导入文件: {}", file_path.to_string_lossy()));
    }
    if !file_path.is_file() {
        return Err(format!("导入路径不是文件: {}", file_path.to_string_lossy()));
    }

    let suffix = file_path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let rows = match suffix.as_str() {
        "csv" => read_csv_rows(file_path)?,
        "xlsx" | "xls" => read_workbook_rows(file_path)?,
        _ => {
            return Err(format!(
                "不支持的文件格式: .{}（仅支持 .csv/.xlsx/.xls）",
                suffix
            ))
        }
    };

    parse_market_rows(&rows)
}

fn ensure_schema_ready(conn: &Connection) -> Result<(), String> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('transactions','import_jobs')",
        )
        .map_err(|e| format!("检查数据库表失败: {e}"))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| format!("读取数据库表失败: {e}"))?;
    let mut table_names = HashSet::new();
    for row in rows {
        table_names.insert(row.map_err(|e| format!("读取数据库表失败: {e}"))?);
    }
    let missing_tables = ["transactions", "import_jobs"]
        .iter()
        .filter(|t| !table_names.contains(**t))
        .copied()
        .collect::<Vec<_>>();
    if !missing_tables.is_empty() {
        return Err(format!(
            "数据库缺少必要表: {}。请先执行迁移。",
            missing_tables.join(", ")
        ));
    }

    let mut stmt = conn
        .prepare("PRAGMA table_info(transactions)")
        .map_err(|e| format!("读取 transactions 字段失败: {e}"))?;
    let cols = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(|e| format!("读取 transactions 字段失败: {e}"))?;
    let mut col_set = HashSet::new();
    for col in cols {
        col_set.insert(col.map_err(|e| format!("读取 transactions 字段失败: {e}"))?);
    }
    let required_cols = ["date", "item_name", "status", "cost", "sell_amount", "profit"];
    let missing_cols = required_cols
        .iter()
        .filter(|c| !col_set.contains(**c))
        .copied()
        .collect::<Vec<_>>();
    if !missing_cols.is_empty() {
        return Err(format!(
            "transactions 缺少字段: {}。请执行最新迁移。",
            missing_cols.join(", ")
        ));
    }

    Ok(())
}

fn rejection_summary(rejected: &RejectedRow) -> String {
    let failures = rejected
        .reason
        .iter()
        .filter(|(_, message)| message.as_str() != "✓")
        .map(|(field, message)| format!("{field}: {message}"))
        .collect::<Vec<_>>();
    format!("第{}行: {}", rejected.index, failures.join("; "))
}

fn resolve_source_path_text(source_path: Option<String>) -> Result<String, String> {
    let path = source_path.unwrap_or_default();
    let path = path.trim().to_string();
    if path.is_empty() {
        return Err("source_path 必填".to_string());
    }
    Ok(path)
}

pub fn market_preview_file_at_path(file_path: &Path) -> Result<Value, String> {
    let parsed = parse_market_file(file_path)?;
    let preview_rows = parsed
        .accepted
        .iter()
        .take(10)
        .map(|record| serde_json::to_value(record).unwrap_or(Value::Null))
        .collect::<Vec<_>>();
    let rejected_samples = parsed
        .rejected
        .iter()
        .take(5)
        .map(|rejected| serde_json::to_value(rejected).unwrap_or(Value::Null))
        .collect::<Vec<_>>();

    Ok(json!({
        "file": file_path.to_string_lossy().to_string(),
        "mapping": parsed.mapping,
        "parsed_count": parsed.accepted.len(),
        "rejected_count": parsed.rejected.len(),
        "total_rows": parsed.total_rows,
        "rejected_samples": rejected_samples,
        "preview_rows": preview_rows,
    }))
}

pub fn market_import_file_at_db_path(
    db_path: &Path,
    file_path: &Path,
    source_type: &str,
) -> Result<Value, String> {
    let parsed = parse_market_file(file_path)?;

    let conn = open_ledger_db(db_path)?;
    ensure_schema_ready(&conn)?;

    let job_id = Uuid::new_v4().to_string();
    let started_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let file_text = file_path.to_string_lossy().to_string();
    let metadata_json = serde_json::to_string(&json!({
        "source_type": source_type,
        "source_file": file_text,
        "mapping": parsed.mapping,
    }))
    .map_err(|e| format!("序列化导入任务元数据失败: {e}"))?;

    conn.execute(
        r#"
        INSERT INTO import_jobs(id, source_type, source_file, status, started_at, total_count, imported_count, error_count, metadata_json)
        VALUES (?1, ?2, ?3, 'running', ?4, 0, 0, 0, ?5)
        "#,
        params![job_id, source_type, file_text, started_at, metadata_json],
    )
    .map_err(|e| format!("创建导入任务失败: {e}"))?;

    let imported = match insert_trade_records(&conn, &parsed.accepted, Some(&file_text), Some(&job_id))
    {
        Ok(count) => count,
        Err(err) => {
            let _ = conn.execute(
                "UPDATE import_jobs SET status='failed', error_message=?1 WHERE id=?2",
                params![err, job_id],
            );
            return Err(err);
        }
    };

    let error_samples = parsed
        .rejected
        .iter()
        .take(20)
        .map(rejection_summary)
        .collect::<Vec<_>>();
    let error_message = if error_samples.is_empty() {
        None
    } else {
        Some(error_samples.join("\n"))
    };
    let finished_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

    conn.execute(
        r#"
        UPDATE import_jobs
        SET status='success',
            finished_at=?1,
            total_count=?2,
            imported_count=?3,
            error_count=?4,
            error_message=?5
        WHERE id=?6
        "#,
        params![
            finished_at,
            parsed.total_rows as i64,
            imported as i64,
            parsed.rejected.len() as i64,
            error_message,
            job_id
        ],
    )
    .map_err(|e| format!("更新导入任务状态失败: {e}"))?;

    Ok(json!({
        "db_path": db_path.to_string_lossy().to_string(),
        "file": file_text,
        "source_type": source_type,
        "imported": imported,
        "total": parsed.total_rows,
        "error_count": parsed.rejected.len(),
        "import_job_id": job_id,
    }))
}

#[tauri::command]
pub fn market_preview_file(req: MarketPreviewRequest) -> Result<Value, String> {
    let source_path = resolve_source_path_text(req.source_path)?;
    market_preview_file_at_path(Path::new(&source_path))
}

#[tauri::command]
pub fn market_import_file(app: AppHandle, req: MarketImportRequest) -> Result<Value, String> {
    let source_path = resolve_source_path_text(req.source_path)?;
    let source_type = req
        .source_type
        .unwrap_or_else(|| DEFAULT_SOURCE_TYPE.to_string());
    let source_type = source_type.trim();
    if source_type.is_empty() {
        return Err("source_type 不能为空".to_string());
    }

    let db_path = resolve_ledger_db_path(&app)?;
    market_import_file_at_db_path(&db_path, Path::new(&source_path), source_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_db::{apply_embedded_migrations, load_all_trade_records};
    use std::fs;
    use std::path::PathBuf;

    fn create_temp_path(prefix: &str, ext: &str) -> PathBuf {
        let unique = format!("{prefix}_{}_{}.{}", std::process::id(), Uuid::new_v4(), ext);
        std::env::temp_dir().join(unique)
    }

    fn string_rows(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|row| row.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn date_layouts_normalize_to_the_same_minute() {
        assert_eq!(
            parse_trade_date("2024.03.15 14:05:30").as_deref(),
            Some("2024-03-15 14:05")
        );
        assert_eq!(
            parse_trade_date("2024.03.1514:05:30").as_deref(),
            Some("2024-03-15 14:05")
        );
        assert_eq!(
            parse_trade_date("3/5/2024 9:30").as_deref(),
            Some("2024-03-05 09:30")
        );
        assert_eq!(
            parse_trade_date("2024-03-15T14:05:59Z").as_deref(),
            Some("2024-03-15 14:05")
        );
        assert_eq!(
            parse_trade_date("2024-03-15 14:05").as_deref(),
            Some("2024-03-15 14:05")
        );
    }

    #[test]
    fn date_rejects_unrecognized_and_impossible_values() {
        assert_eq!(parse_trade_date(""), None);
        assert_eq!(parse_trade_date("2024-03-15"), None);
        assert_eq!(parse_trade_date("昨天下午"), None);
        assert_eq!(parse_trade_date("2024.13.40 25:61:00"), None);
        assert_eq!(parse_trade_date("-3.5"), None);
    }

    #[test]
    fn day_serials_map_through_the_1899_anchor() {
        // Serial 43831 is 2020-01-01 in the 1900 date system.
        assert_eq!(parse_trade_date("43831").as_deref(), Some("2020-01-01 00:00"));
        assert_eq!(
            parse_trade_date("43831.25").as_deref(),
            Some("2020-01-01 06:00")
        );
        assert_eq!(
            parse_trade_date("43831.75").as_deref(),
            Some("2020-01-01 18:00")
        );
        assert_eq!(parse_trade_date("43832").as_deref(), Some("2020-01-02 00:00"));
        assert_eq!(parse_trade_date("1").as_deref(), Some("1899-12-31 00:00"));
        assert_eq!(parse_trade_date("0").as_deref(), Some("1899-12-30 00:00"));
    }

    #[test]
    fn prices_pass_through_or_strip_formatting_noise() {
        assert_eq!(parse_price("500"), Some(500.0));
        assert_eq!(parse_price("-12.5"), Some(-12.5));
        assert_eq!(parse_price("1,234.56"), Some(1234.56));
        assert_eq!(parse_price("￥1,234.56元"), Some(1234.56));
        assert_eq!(parse_price("abc"), None);
        assert_eq!(parse_price(""), None);
    }

    #[test]
    fn status_keywords_win_by_containment() {
        assert_eq!(classify_status("出售"), TradeStatus::Sell);
        assert_eq!(classify_status("SELL via auction"), TradeStatus::Sell);
        assert_eq!(classify_status("消耗品"), TradeStatus::Consume);
        assert_eq!(classify_status("随便写的"), TradeStatus::Stock);
        assert_eq!(classify_status(""), TradeStatus::Stock);
    }

    #[test]
    fn item_names_collapse_whitespace_and_compose() {
        assert_eq!(
            clean_item_name("  AK-47  |  红线  ").as_deref(),
            Some("AK-47 | 红线")
        );
        // Decomposed e + U+0301 composes to U+00E9.
        assert_eq!(
            clean_item_name("Cafe\u{0301} Set").as_deref(),
            Some("Caf\u{00e9} Set")
        );
        assert_eq!(clean_item_name("   "), None);
    }

    #[test]
    fn sell_time_is_preferred_and_falls_back_per_row() {
        let rows = string_rows(&[
            &["出售时间", "购买时间", "饰品名称", "价格"],
            &["2024-03-15 14:05", "2024-01-02 08:00", "印花A", "3"],
            &["", "2024-01-02 08:00", "印花B", "4"],
        ]);
        let parsed = parse_market_rows(&rows).expect("parse rows");
        assert_eq!(parsed.accepted.len(), 2);
        assert_eq!(parsed.accepted[0].date, "2024-03-15 14:05");
        assert_eq!(parsed.accepted[1].date, "2024-01-02 08:00");
    }

    #[test]
    fn header_row_is_located_below_preamble() {
        let rows = string_rows(&[
            &["导出报表", ""],
            &["", ""],
            &["Date", "Item Name", "Price", "Type"],
            &["2024-03-15 14:05", "Crate Key", "2.49", "sell listing"],
        ]);
        let parsed = parse_market_rows(&rows).expect("parse rows");
        assert_eq!(parsed.total_rows, 1);
        assert_eq!(parsed.accepted.len(), 1);
        assert_eq!(parsed.accepted[0].status, TradeStatus::Sell);
    }

    #[test]
    fn missing_header_is_a_file_level_error() {
        let rows = string_rows(&[&["a", "b"], &["1", "2"]]);
        let err = parse_market_rows(&rows).expect_err("must fail");
        assert!(err.contains("未找到必要表头"));
    }

    #[test]
    fn builder_partitions_rows_and_keeps_reasons() {
        let rows = string_rows(&[
            &["出售时间", "饰品名称", "价格", "出售金额", "类型"],
            &["2024-03-15 14:05", "AK-47 | 红线", "10", "15", "出售"],
            &["2024-02-10 12:00", "印花 | 猛火", "2", "", "消耗"],
            &["2024-01-02 08:00", "运载火箭武器箱", "5", "", ""],
            &["", "没有日期的行", "3", "", ""],
            &["2024-01-05 09:00", "成本损坏的行", "abc", "", ""],
        ]);
        let parsed = parse_market_rows(&rows).expect("parse rows");
        assert_eq!(parsed.total_rows, 5);
        assert_eq!(parsed.accepted.len(), 3);
        assert_eq!(parsed.rejected.len(), 2);

        let sell = &parsed.accepted[0];
        assert_eq!(sell.status, TradeStatus::Sell);
        assert_eq!(sell.profit, 5.0);
        let consume = &parsed.accepted[1];
        assert_eq!(consume.status, TradeStatus::Consume);
        assert_eq!(consume.profit, -2.0);
        assert_eq!(consume.sell_amount, 0.0, "unparseable sell amount defaults to 0");
        let stock = &parsed.accepted[2];
        assert_eq!(stock.status, TradeStatus::Stock);
        assert_eq!(stock.profit, 0.0);

        let no_date = &parsed.rejected[0];
        assert_eq!(no_date.index, 5);
        assert_eq!(no_date.reason.get("date").map(String::as_str), Some("日期解析失败"));
        assert_eq!(no_date.reason.get("cost").map(String::as_str), Some("✓"));
        let bad_cost = &parsed.rejected[1];
        assert_eq!(bad_cost.reason.get("cost").map(String::as_str), Some("成本解析失败"));
        assert_eq!(
            bad_cost.original.get("饰品名称").map(String::as_str),
            Some("成本损坏的行")
        );
    }

    #[test]
    fn builder_is_pure_per_row() {
        let rows = string_rows(&[
            &["出售时间", "饰品名称", "价格", "出售金额", "类型"],
            &["2024-03-15 14:05", "AK-47 | 红线", "10", "15", "出售"],
        ]);
        let first = parse_market_rows(&rows).expect("first pass");
        let second = parse_market_rows(&rows).expect("second pass");
        assert_eq!(first.accepted, second.accepted);
        assert_eq!(first.total_rows, second.total_rows);
    }

    #[test]
    fn zero_cost_is_present_not_absent() {
        let rows = string_rows(&[
            &["出售时间", "饰品名称", "价格"],
            &["2024-03-15 14:05", "赠品箱", "0"],
        ]);
        let parsed = parse_market_rows(&rows).expect("parse rows");
        assert_eq!(parsed.accepted.len(), 1);
        assert_eq!(parsed.accepted[0].cost, 0.0);
    }

    fn write_sample_market_csv(path: &Path) {
        let csv = "\
出售时间,饰品名称,价格,出售金额,类型\n\
2024.03.15 14:05:30,AK-47 | 红线,10,15,出售\n\
2024-02-10 12:00,印花 | 猛火,2,,消耗\n\
2024-01-02 08:00,运载火箭武器箱,5,,\n\
,没有日期的行,3,,\n";
        fs::write(path, csv).expect("write temp market csv");
    }

    #[test]
    fn csv_preview_reports_counts_and_mapping() {
        let csv_path = create_temp_path("itemledger_preview_fixture", "csv");
        write_sample_market_csv(&csv_path);

        let preview = market_preview_file_at_path(&csv_path).expect("preview csv");
        assert_eq!(preview.get("parsed_count").and_then(Value::as_i64), Some(3));
        assert_eq!(preview.get("rejected_count").and_then(Value::as_i64), Some(1));
        assert_eq!(preview.get("total_rows").and_then(Value::as_i64), Some(4));
        assert_eq!(
            preview
                .get("mapping")
                .and_then(|m| m.get("date"))
                .and_then(Value::as_str),
            Some("出售时间")
        );

        let _ = fs::remove_file(&csv_path);
    }

    #[test]
    fn csv_import_appends_on_reimport() {
        let db_path = create_temp_path("itemledger_import_test", "db");
        let csv_path = create_temp_path("itemledger_import_fixture", "csv");
        write_sample_market_csv(&csv_path);
        apply_embedded_migrations(&db_path).expect("migrate temp db");

        let first = market_import_file_at_db_path(&db_path, &csv_path, "market_csv")
            .expect("first import");
        assert_eq!(first.get("imported").and_then(Value::as_i64), Some(3));
        assert_eq!(first.get("total").and_then(Value::as_i64), Some(4));
        assert_eq!(first.get("error_count").and_then(Value::as_i64), Some(1));

        let second = market_import_file_at_db_path(&db_path, &csv_path, "market_csv")
            .expect("second import");
        assert_eq!(second.get("imported").and_then(Value::as_i64), Some(3));

        let conn = open_ledger_db(&db_path).expect("open temp db");
        let records = load_all_trade_records(&conn).expect("load records");
        assert_eq!(records.len(), 6, "re-import appends, it does not reconcile");

        let job_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM import_jobs WHERE source_type='market_csv' AND status='success'",
                [],
                |row| row.get(0),
            )
            .expect("count import jobs");
        assert_eq!(job_count, 2);

        let _ = fs::remove_file(&csv_path);
        let _ = fs::remove_file(&db_path);
    }

    #[test]
    fn unsupported_extension_fails_before_any_rows() {
        let db_path = create_temp_path("itemledger_badext_test", "db");
        let txt_path = create_temp_path("itemledger_badext_fixture", "txt");
        fs::write(&txt_path, "出售时间,饰品名称\n2024-03-15 14:05,东西\n").expect("write txt");
        apply_embedded_migrations(&db_path).expect("migrate temp db");

        let err = market_import_file_at_db_path(&db_path, &txt_path, "market_csv")
            .expect_err("txt must be refused");
        assert!(err.contains("不支持的文件格式"));

        let conn = open_ledger_db(&db_path).expect("open temp db");
        let records = load_all_trade_records(&conn).expect("load records");
        assert!(records.is_empty(), "file-level failure must not commit partial state");

        let _ = fs::remove_file(&txt_path);
        let _ = fs::remove_file(&db_path);
    }

    #[test]
    fn missing_file_is_a_file_level_error() {
        let missing = create_temp_path("itemledger_missing_fixture", "csv");
        let err = parse_market_file(&missing).expect_err("missing file must fail");
        assert!(err.contains("未找到导入文件"));
    }
}
