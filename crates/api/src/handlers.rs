use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use jobcenter_domain::entities::TriggerType;
use jobcenter_domain::messages::{HandleCallbackParam, RegistryParam, RpcReply};
use jobcenter_dispatcher::TriggerTask;

use crate::routes::AppState;

/// 执行结果回调，执行器批量上报
pub async fn callback(
    State(state): State<AppState>,
    Json(params): Json<Vec<HandleCallbackParam>>,
) -> Json<RpcReply<String>> {
    Json(state.complete_service.callback(params).await)
}

/// 注册/心跳续期
pub async fn registry(
    State(state): State<AppState>,
    Json(param): Json<RegistryParam>,
) -> Json<RpcReply<String>> {
    Json(state.registry_service.register(param).await)
}

/// 摘除注册
pub async fn registry_remove(
    State(state): State<AppState>,
    Json(param): Json<RegistryParam>,
) -> Json<RpcReply<String>> {
    Json(state.registry_service.unregister(param).await)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunJobRequest {
    /// 执行参数覆盖，省略时使用任务配置
    pub executor_param: Option<String>,
}

/// 手动触发一次任务
pub async fn run_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<RunJobRequest>>,
) -> Json<RpcReply<String>> {
    let mut task = TriggerTask::new(id, TriggerType::Api);
    task.executor_param = body.and_then(|Json(b)| b.executor_param);
    state.trigger_sink.submit(task).await;
    Json(RpcReply::success_empty())
}

/// 健康检查
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Prometheus指标导出
pub async fn metrics_export(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}
