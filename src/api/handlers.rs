use crate::config::AuditConfig;
use crate::models::{BatchStats, ShipmentInfo, ValidationRecord, ValidationRequest};
use crate::service::AuditEngine;
use crate::source::InMemoryShipments;
use crate::AuditResult;
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// 共享状态：默认规则下的校验引擎
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AuditEngine>,
}

impl AppState {
    pub fn new(engine: AuditEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

/// 请求体: 待校验明细，可选覆盖规则与运单信息
#[derive(Debug, Deserialize)]
pub struct BatchValidateRequest {
    pub items: Vec<ValidationRequest>,
    /// 运单号 → 运单信息
    #[serde(default)]
    pub shipments: Option<HashMap<String, ShipmentInfo>>,
    /// 本次请求使用的规则 (缺省沿用服务配置)
    #[serde(default)]
    pub rules: Option<AuditConfig>,
}

/// 响应体（含统计信息）
#[derive(Debug, Serialize)]
pub struct BatchValidateResponse {
    pub success: bool,
    pub message: String,
    pub stats: Option<BatchStats>,
    pub records: Vec<ValidationRecord>,
}

impl BatchValidateResponse {
    fn error(status: StatusCode, message: String) -> Response {
        let response = BatchValidateResponse {
            success: false,
            message,
            stats: None,
            records: Vec::new(),
        };
        (status, Json(response)).into_response()
    }
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

/// 有覆盖项时派生新引擎，线程池与证据通道保持共享
fn engine_for(
    base: &Arc<AuditEngine>,
    rules: Option<AuditConfig>,
    shipments: Option<HashMap<String, ShipmentInfo>>,
) -> AuditResult<Arc<AuditEngine>> {
    if rules.is_none() && shipments.is_none() {
        return Ok(Arc::clone(base));
    }
    let rules = rules.unwrap_or_else(|| base.config().clone());
    let mut engine = base.with_rules(rules)?;
    if let Some(map) = shipments {
        engine = engine.with_shipments(Arc::new(InMemoryShipments::from_map(map)));
    }
    Ok(Arc::new(engine))
}

/// 批量校验接口
pub async fn batch_validate(
    State(state): State<AppState>,
    Json(req): Json<BatchValidateRequest>,
) -> Response {
    let engine = match engine_for(&state.engine, req.rules, req.shipments) {
        Ok(engine) => engine,
        Err(e) => {
            return BatchValidateResponse::error(StatusCode::BAD_REQUEST, format!("Error: {}", e))
        }
    };

    let items = req.items;
    // 解析引擎调用可能阻塞，放到阻塞线程池执行
    let result = tokio::task::spawn_blocking(move || engine.validate_batch(&items)).await;

    match result {
        Ok(outcome) => {
            let stats = outcome.stats;
            let response = BatchValidateResponse {
                success: true,
                message: format!(
                    "Validated {} items: {} passed, {} need review, {} failed, {} errored",
                    stats.total_items,
                    stats.passed,
                    stats.review_needed,
                    stats.failed,
                    stats.errored
                ),
                stats: Some(stats),
                records: outcome.records,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            tracing::error!("[Api] batch validation task failed: {}", e);
            BatchValidateResponse::error(StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}", e))
        }
    }
}
