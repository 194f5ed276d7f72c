use std::sync::Arc;
use tax_itc_recon::api::{self, AppState};
use tax_itc_recon::config::StorageKind;
use tax_itc_recon::db::{CompanyStore, InvoiceStore, MemoryStore, PgCompanyStore, PgInvoiceStore, PgReconStore, ReconStore};
use tax_itc_recon::service::GstStateTable;
use tax_itc_recon::{create_pool, ActionService, AppConfig, ReconciliationService};
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 使用本地时间格式
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::load()?;
    info!("Starting server with config: {:?}", config);

    let store: Arc<dyn ReconStore>;
    let invoices: Arc<dyn InvoiceStore>;
    let companies: Arc<dyn CompanyStore>;
    match config.storage {
        StorageKind::Postgres => {
            let pool = create_pool(&config.database).await?;
            info!("Database pool created");
            store = Arc::new(PgReconStore::new(pool.clone()));
            invoices = Arc::new(PgInvoiceStore::new(pool.clone()));
            companies = Arc::new(PgCompanyStore::new(pool));
        }
        StorageKind::Memory => {
            info!("使用内存存储, 数据不会持久化");
            let memory = Arc::new(MemoryStore::new());
            store = memory.clone();
            invoices = memory.clone();
            companies = memory;
        }
    }

    let recon = ReconciliationService::new(
        Arc::clone(&store),
        Arc::clone(&invoices),
        companies,
        Arc::new(GstStateTable::new()),
        config.recon.clone(),
    )?;
    let state = AppState {
        recon: Arc::new(recon),
        actions: Arc::new(ActionService::new(store, invoices)),
    };

    let app = api::router(state);

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("Matching strategy: {:?}, workers: {}", config.recon.strategy, config.recon.match_workers);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
