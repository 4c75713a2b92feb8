// ==========================================
// 堆场客户池分配引擎 - 命令行入口
// ==========================================
// 用法:
//   yard-pool-allocation stats [yard_id]
//   yard-pool-allocation backfill <inventory.csv> <yard_id>
// 数据库路径: YARD_POOL_DB_PATH 或用户数据目录
// ==========================================

use yard_pool::app::{get_default_db_path, AppState};
use yard_pool::importer::CsvContainerInventory;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    yard_pool::logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", yard_pool::APP_NAME);
    tracing::info!("系统版本: {}", yard_pool::VERSION);
    tracing::info!("==================================================");

    let db_path = get_default_db_path();
    tracing::info!("使用数据库: {}", db_path);
    let state = AppState::new(db_path)?;

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None | Some("stats") => {
            let yard_id = args.next();
            let stats = state.pool_api.get_pool_stats(yard_id.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Some("backfill") => {
            let (Some(csv_path), Some(yard_id)) = (args.next(), args.next()) else {
                return Err("用法: backfill <inventory.csv> <yard_id>".into());
            };
            let source = CsvContainerInventory::new(csv_path);
            let report = state.occupancy_backfill.run(&source, &yard_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Some(other) => {
            return Err(format!("未知命令: {}（可用: stats, backfill）", other).into());
        }
    }

    Ok(())
}
