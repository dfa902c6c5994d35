use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tauri::AppHandle;

use crate::ledger_db::{
    load_all_trade_records, open_ledger_db, resolve_ledger_db_path, TradeRecord, TradeStatus,
};

const DEFAULT_ITEM_RANKING_LIMIT: usize = 10;
const DEFAULT_LOSS_RANKING_LIMIT: usize = 20;
const DEFAULT_STOCK_RANKING_LIMIT: usize = 20;

/// Summary statistics over the full record set. Serialized keys are the
/// camelCase names the dashboard shell binds to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeStats {
    pub total_cost: f64,
    pub total_sell_amount: f64,
    pub profit: f64,
    pub item_count: usize,
    pub transaction_count: usize,
    pub sell_count: usize,
    pub consume_count: usize,
    pub stock_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyTrendRow {
    pub month: String,
    pub cost: f64,
    pub sell: f64,
}

/// One ranked row per individual transaction; repeats of the same item are
/// never aggregated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedTrade {
    pub item_name: String,
    pub date: String,
    pub cost: f64,
    pub sell_amount: f64,
    pub profit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockRankingRow {
    pub item_name: String,
    pub total_cost: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeDistributionRow {
    pub status: TradeStatus,
    pub count: usize,
}

pub fn compute_trade_stats(records: &[TradeRecord]) -> TradeStats {
    let mut stats = TradeStats {
        total_cost: 0.0,
        total_sell_amount: 0.0,
        profit: 0.0,
        item_count: 0,
        transaction_count: records.len(),
        sell_count: 0,
        consume_count: 0,
        stock_count: 0,
    };

    let mut items = HashSet::new();
    for record in records {
        stats.total_cost += record.cost;
        items.insert(record.item_name.as_str());
        match record.status {
            TradeStatus::Sell => {
                stats.sell_count += 1;
                stats.total_sell_amount += record.sell_amount;
                stats.profit += record.profit;
            }
            TradeStatus::Consume => {
                stats.consume_count += 1;
                stats.profit += record.profit;
            }
            TradeStatus::Stock => stats.stock_count += 1,
        }
    }
    stats.item_count = items.len();
    stats
}

fn month_key(date: &str) -> String {
    date.chars().take(7).collect()
}

/// One row per observed month, ascending; lexicographic order of the
/// `YYYY-MM` key is chronological.
pub fn compute_monthly_trend(records: &[TradeRecord]) -> Vec<MonthlyTrendRow> {
    let mut buckets: BTreeMap<String, MonthlyTrendRow> = BTreeMap::new();
    for record in records {
        let month = month_key(&record.date);
        let row = buckets.entry(month.clone()).or_insert_with(|| MonthlyTrendRow {
            month,
            cost: 0.0,
            sell: 0.0,
        });
        row.cost += record.cost;
        if record.status == TradeStatus::Sell {
            row.sell += record.sell_amount;
        }
    }
    buckets.into_values().collect()
}

fn ranked_trade(record: &TradeRecord) -> RankedTrade {
    RankedTrade {
        item_name: record.item_name.clone(),
        date: record.date.clone(),
        cost: record.cost,
        sell_amount: record.sell_amount,
        profit: record.profit,
    }
}

fn is_completed(record: &TradeRecord) -> bool {
    matches!(record.status, TradeStatus::Sell | TradeStatus::Consume)
}

pub fn compute_item_ranking(records: &[TradeRecord], limit: usize) -> Vec<RankedTrade> {
    let mut ranking = records
        .iter()
        .filter(|r| is_completed(r))
        .map(ranked_trade)
        .collect::<Vec<_>>();
    // Stable sort: equal profits keep their insertion order.
    ranking.sort_by(|a, b| b.profit.partial_cmp(&a.profit).unwrap_or(Ordering::Equal));
    ranking.truncate(limit);
    ranking
}

pub fn compute_loss_ranking(records: &[TradeRecord], limit: usize) -> Vec<RankedTrade> {
    let mut ranking = records
        .iter()
        .filter(|r| is_completed(r) && r.profit < 0.0)
        .map(ranked_trade)
        .collect::<Vec<_>>();
    ranking.sort_by(|a, b| a.profit.partial_cmp(&b.profit).unwrap_or(Ordering::Equal));
    ranking.truncate(limit);
    ranking
}

pub fn compute_stock_ranking(records: &[TradeRecord], limit: usize) -> Vec<StockRankingRow> {
    let mut rows: Vec<StockRankingRow> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for record in records {
        if record.status != TradeStatus::Stock {
            continue;
        }
        match index.get(record.item_name.as_str()) {
            Some(&pos) => {
                rows[pos].total_cost += record.cost;
                rows[pos].count += 1;
            }
            None => {
                index.insert(record.item_name.as_str(), rows.len());
                rows.push(StockRankingRow {
                    item_name: record.item_name.clone(),
                    total_cost: record.cost,
                    count: 1,
                });
            }
        }
    }
    rows.sort_by(|a, b| {
        b.total_cost
            .partial_cmp(&a.total_cost)
            .unwrap_or(Ordering::Equal)
    });
    rows.truncate(limit);
    rows
}

/// Counts per status in first-seen order.
pub fn compute_type_distribution(records: &[TradeRecord]) -> Vec<TypeDistributionRow> {
    let mut rows: Vec<TypeDistributionRow> = Vec::new();
    let mut index: HashMap<TradeStatus, usize> = HashMap::new();
    for record in records {
        match index.get(&record.status) {
            Some(&pos) => rows[pos].count += 1,
            None => {
                index.insert(record.status, rows.len());
                rows.push(TypeDistributionRow {
                    status: record.status,
                    count: 1,
                });
            }
        }
    }
    rows
}

pub fn trade_stats_query_at_db_path(db_path: &Path) -> Result<TradeStats, String> {
    let conn = open_ledger_db(db_path)?;
    let records = load_all_trade_records(&conn)?;
    Ok(compute_trade_stats(&records))
}

pub fn monthly_trend_query_at_db_path(db_path: &Path) -> Result<Vec<MonthlyTrendRow>, String> {
    let conn = open_ledger_db(db_path)?;
    let records = load_all_trade_records(&conn)?;
    Ok(compute_monthly_trend(&records))
}

pub fn item_ranking_query_at_db_path(
    db_path: &Path,
    limit: usize,
) -> Result<Vec<RankedTrade>, String> {
    let conn = open_ledger_db(db_path)?;
    let records = load_all_trade_records(&conn)?;
    Ok(compute_item_ranking(&records, limit))
}

pub fn loss_ranking_query_at_db_path(
    db_path: &Path,
    limit: usize,
) -> Result<Vec<RankedTrade>, String> {
    let conn = open_ledger_db(db_path)?;
    let records = load_all_trade_records(&conn)?;
    Ok(compute_loss_ranking(&records, limit))
}

pub fn stock_ranking_query_at_db_path(
    db_path: &Path,
    limit: usize,
) -> Result<Vec<StockRankingRow>, String> {
    let conn = open_ledger_db(db_path)?;
    let records = load_all_trade_records(&conn)?;
    Ok(compute_stock_ranking(&records, limit))
}

pub fn type_distribution_query_at_db_path(
    db_path: &Path,
) -> Result<Vec<TypeDistributionRow>, String> {
    let conn = open_ledger_db(db_path)?;
    let records = load_all_trade_records(&conn)?;
    Ok(compute_type_distribution(&records))
}

#[tauri::command]
pub fn trade_stats_query(app: AppHandle) -> Result<TradeStats, String> {
    let db_path = resolve_ledger_db_path(&app)?;
    trade_stats_query_at_db_path(&db_path)
}

#[tauri::command]
pub fn monthly_trend_query(app: AppHandle) -> Result<Vec<MonthlyTrendRow>, String> {
    let db_path = resolve_ledger_db_path(&app)?;
    monthly_trend_query_at_db_path(&db_path)
}

#[tauri::command]
pub fn item_ranking_query(app: AppHandle, limit: Option<usize>) -> Result<Vec<RankedTrade>, String> {
    let db_path = resolve_ledger_db_path(&app)?;
    item_ranking_query_at_db_path(&db_path, limit.unwrap_or(DEFAULT_ITEM_RANKING_LIMIT))
}

#[tauri::command]
pub fn loss_ranking_query(app: AppHandle, limit: Option<usize>) -> Result<Vec<RankedTrade>, String> {
    let db_path = resolve_ledger_db_path(&app)?;
    loss_ranking_query_at_db_path(&db_path, limit.unwrap_or(DEFAULT_LOSS_RANKING_LIMIT))
}

#[tauri::command]
pub fn stock_ranking_query(
    app: AppHandle,
    limit: Option<usize>,
) -> Result<Vec<StockRankingRow>, String> {
    let db_path = resolve_ledger_db_path(&app)?;
    stock_ranking_query_at_db_path(&db_path, limit.unwrap_or(DEFAULT_STOCK_RANKING_LIMIT))
}

#[tauri::command]
pub fn type_distribution_query(app: AppHandle) -> Result<Vec<TypeDistributionRow>, String> {
    let db_path = resolve_ledger_db_path(&app)?;
    type_distribution_query_at_db_path(&db_path)
}
