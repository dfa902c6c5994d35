mod commands;
mod ledger_db;
mod market_import;
mod trade_analytics;

pub use ledger_db::{clear_transactions_at_db_path, ClearTransactionsResult, TradeRecord, TradeStatus};
pub use market_import::{
    market_import_file_at_db_path, market_preview_file_at_path, parse_market_file,
    ParsedMarketFile, RejectedRow,
};
pub use trade_analytics::{
    item_ranking_query_at_db_path, loss_ranking_query_at_db_path, monthly_trend_query_at_db_path,
    stock_ranking_query_at_db_path, trade_stats_query_at_db_path,
    type_distribution_query_at_db_path, MonthlyTrendRow, RankedTrade, StockRankingRow,
    TradeStats, TypeDistributionRow,
};

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .plugin(tauri_plugin_opener::init())
        .invoke_handler(tauri::generate_handler![
            commands::health_ping,
            commands::app_metadata,
            ledger_db::ledger_db_status,
            ledger_db::ledger_db_migrate,
            ledger_db::clear_all_transactions,
            market_import::market_preview_file,
            market_import::market_import_file,
            trade_analytics::trade_stats_query,
            trade_analytics::monthly_trend_query,
            trade_analytics::item_ranking_query,
            trade_analytics::loss_ranking_query,
            trade_analytics::stock_ranking_query,
            trade_analytics::type_distribution_query,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
