use freight_audit_rust::source::{BreakerPolicy, DailyBudget, DocumentParser, EvidenceGateway, JsonDocumentParser};
use freight_audit_rust::{api, AppConfig, AuditEngine};
use std::sync::Arc;
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
    let config = AppConfig::from_env()?;
    info!("Starting server with config: {:?}", config.server);
    info!("Engine config: {:?}", config.engine);

    // 证据通道：解析结果读取 + 熔断 + 每日预算
    let parser: Arc<dyn DocumentParser> = match &config.engine.document_root {
        Some(root) => Arc::new(JsonDocumentParser::with_root(root)),
        None => Arc::new(JsonDocumentParser::new()),
    };
    let gateway = EvidenceGateway::new(parser)
        .with_breaker(BreakerPolicy {
            failure_threshold: config.engine.breaker_failure_threshold,
            cool_down: config.engine.cool_down(),
        })
        .with_budget(DailyBudget::new(config.engine.daily_budget));

    // 创建校验引擎
    let engine = AuditEngine::new(config.audit.clone(), &config.engine)?.with_gateway(Arc::new(gateway));
    info!(
        "Audit engine ready: {} contract rates, {} lane rates, {} fixed fees, {} portal fees",
        engine.config().contract_rates.len(),
        engine.config().lane_rates.len(),
        engine.config().fixed_fees.len(),
        engine.config().portal_fees.len()
    );

    let app = api::router(api::AppState::new(engine));

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  GET  /health");
    info!("  POST /api/validate/batch");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
