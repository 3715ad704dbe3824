use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use jobcenter_core::constants::ACCESS_TOKEN_HEADER;
use jobcenter_domain::messages::RpcReply;

use crate::routes::AppState;

/// 访问令牌校验
///
/// 配置了`access_token`时要求请求头携带相同令牌，未配置时放行。
/// 校验失败仍返回200，用RPC信封的失败码表达，执行器按code判断。
pub async fn access_token_guard(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.access_token.is_empty() {
        let provided = request
            .headers()
            .get(ACCESS_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != state.access_token {
            warn!("访问令牌校验失败: uri={}", request.uri());
            return Json(RpcReply::<String>::fail("访问令牌无效")).into_response();
        }
    }
    next.run(request).await
}

pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

pub fn trace_layer(
) -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>>
{
    TraceLayer::new_for_http()
}
