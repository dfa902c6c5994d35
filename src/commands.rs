use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use tauri::{AppHandle, Manager};

use crate::ledger_db::resolve_ledger_db_path;

#[derive(Debug, Serialize)]
pub struct HealthPing {
    pub status: &'static str,
    pub unix_ts: u64,
    pub ledger_db_exists: bool,
}

#[derive(Debug, Serialize)]
pub struct AppMetadata {
    pub app_name: String,
    pub app_version: String,
    pub target_os: String,
    pub target_arch: String,
    pub debug: bool,
}

fn now_unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[tauri::command]
pub fn health_ping(app: AppHandle) -> HealthPing {
    let ledger_db_exists = resolve_ledger_db_path(&app)
        .map(|path| path.exists())
        .unwrap_or(false);
    HealthPing {
        status: "ok",
        unix_ts: now_unix_ts(),
        ledger_db_exists,
    }
}

#[tauri::command]
pub fn app_metadata(app: AppHandle) -> AppMetadata {
    let package = app.package_info();
    AppMetadata {
        app_name: package.name.clone(),
        app_version: package.version.to_string(),
        target_os: std::env::consts::OS.to_string(),
        target_arch: std::env::consts::ARCH.to_string(),
        debug: cfg!(debug_assertions),
    }
}
