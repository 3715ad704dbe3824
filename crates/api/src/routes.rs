use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;

use jobcenter_dispatcher::{CompleteService, RegistryService, TriggerSink};

use crate::handlers::{callback, health_check, metrics_export, registry, registry_remove, run_job};
use crate::middleware::{access_token_guard, cors_layer, trace_layer};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub registry_service: Arc<RegistryService>,
    pub complete_service: Arc<CompleteService>,
    pub trigger_sink: Arc<dyn TriggerSink>,
    pub access_token: String,
    pub metrics_handle: PrometheusHandle,
}

/// 创建API路由
///
/// `/api/*`是执行器协议面，受访问令牌保护；`/health`与`/metrics`
/// 面向运维探活与采集，不做鉴权。
pub fn create_routes(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/callback", post(callback))
        .route("/api/registry", post(registry))
        .route("/api/registryRemove", post(registry_remove))
        .route("/api/jobs/{id}/run", post(run_job))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            access_token_guard,
        ));

    Router::new()
        .merge(protected)
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_export))
        .layer(cors_layer())
        .layer(trace_layer())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{DateTime, Utc};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    use jobcenter_core::constants::ACCESS_TOKEN_HEADER;
    use jobcenter_core::{JobCenterError, JobCenterResult};
    use jobcenter_domain::entities::{JobGroup, JobInfo, JobLog, RegistryEntry, TriggerType};
    use jobcenter_domain::messages::RpcReply;
    use jobcenter_domain::repositories::{
        JobGroupRepository, JobInfoRepository, JobLogRepository, JobRegistryRepository,
    };
    use jobcenter_dispatcher::TriggerTask;

    use super::*;

    /// 接口测试用的最小存根：记录注册心跳，其余仓储操作为空实现
    #[derive(Default)]
    struct StubStore {
        registrations: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl JobRegistryRepository for StubStore {
        async fn upsert(&self, group: &str, key: &str, value: &str) -> JobCenterResult<()> {
            self.registrations.lock().await.push((
                group.to_string(),
                key.to_string(),
                value.to_string(),
            ));
            Ok(())
        }

        async fn remove(&self, _group: &str, _key: &str, _value: &str) -> JobCenterResult<()> {
            Ok(())
        }

        async fn find_dead_ids(&self, _timeout_seconds: i64) -> JobCenterResult<Vec<i64>> {
            Ok(Vec::new())
        }

        async fn remove_by_ids(&self, _ids: &[i64]) -> JobCenterResult<()> {
            Ok(())
        }

        async fn find_alive(&self, _timeout_seconds: i64) -> JobCenterResult<Vec<RegistryEntry>> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl JobGroupRepository for StubStore {
        async fn load(&self, _id: i64) -> JobCenterResult<Option<JobGroup>> {
            Ok(None)
        }

        async fn find_by_address_type(&self, _address_type: i16) -> JobCenterResult<Vec<JobGroup>> {
            Ok(Vec::new())
        }

        async fn update_address_list(
            &self,
            _id: i64,
            _address_list: Option<&str>,
        ) -> JobCenterResult<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl JobInfoRepository for StubStore {
        async fn load(&self, _id: i64) -> JobCenterResult<Option<JobInfo>> {
            Ok(None)
        }

        async fn find_due(&self, _max_next_time: i64, _limit: i64) -> JobCenterResult<Vec<JobInfo>> {
            Ok(Vec::new())
        }

        async fn batch_update_schedule(&self, _jobs: &[JobInfo]) -> JobCenterResult<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl JobLogRepository for StubStore {
        async fn create(&self, _log: &JobLog) -> JobCenterResult<i64> {
            Ok(1)
        }

        async fn load(&self, _id: i64) -> JobCenterResult<Option<JobLog>> {
            Ok(None)
        }

        async fn update_trigger_info(&self, _log: &JobLog) -> JobCenterResult<()> {
            Ok(())
        }

        async fn update_handle_info(&self, _log: &JobLog) -> JobCenterResult<()> {
            Ok(())
        }

        async fn find_lost_ids(&self, _before: DateTime<Utc>) -> JobCenterResult<Vec<i64>> {
            Ok(Vec::new())
        }

        async fn find_fail_ids(&self, _limit: i64) -> JobCenterResult<Vec<i64>> {
            Ok(Vec::new())
        }

        async fn update_alarm_status(
            &self,
            _id: i64,
            _expected: i16,
            _new_status: i16,
        ) -> JobCenterResult<bool> {
            Err(JobCenterError::Internal("测试存根不支持".to_string()))
        }

        async fn clean_before(&self, _before: DateTime<Utc>) -> JobCenterResult<u64> {
            Ok(0)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        tasks: Mutex<Vec<TriggerTask>>,
    }

    #[async_trait]
    impl TriggerSink for RecordingSink {
        async fn submit(&self, task: TriggerTask) {
            self.tasks.lock().await.push(task);
        }
    }

    fn build_app(
        access_token: &str,
    ) -> (Router, Arc<StubStore>, Arc<RecordingSink>) {
        let store = Arc::new(StubStore::default());
        let sink = Arc::new(RecordingSink::default());
        let state = AppState {
            registry_service: RegistryService::start(store.clone(), store.clone()),
            complete_service: CompleteService::start(store.clone(), store.clone(), sink.clone()),
            trigger_sink: sink.clone(),
            access_token: access_token.to_string(),
            metrics_handle: PrometheusBuilder::new().build_recorder().handle(),
        };
        (create_routes(state), store, sink)
    }

    async fn reply_of(response: axum::response::Response) -> RpcReply<String> {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint_open() {
        let (app, _, _) = build_app("secret");
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_registry_requires_token() {
        let (app, store, _) = build_app("secret");
        let body = r#"{"registryGroup":"EXECUTOR","registryKey":"demo","registryValue":"10.0.0.1:9999"}"#;

        let response = app
            .oneshot(
                Request::post("/api/registry")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        // 无令牌：HTTP层200，信封层失败
        assert_eq!(response.status(), StatusCode::OK);
        let reply = reply_of(response).await;
        assert!(!reply.is_success());
        assert!(store.registrations.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_registry_with_token_accepted() {
        let (app, store, _) = build_app("secret");
        let body = r#"{"registryGroup":"EXECUTOR","registryKey":"demo","registryValue":"10.0.0.1:9999"}"#;

        let response = app
            .oneshot(
                Request::post("/api/registry")
                    .header("content-type", "application/json")
                    .header(ACCESS_TOKEN_HEADER, "secret")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        let reply = reply_of(response).await;
        assert!(reply.is_success());

        // 异步写入，稍等落库
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let registrations = store.registrations.lock().await;
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].2, "10.0.0.1:9999");
    }

    #[tokio::test]
    async fn test_no_token_configured_allows_all() {
        let (app, _, _) = build_app("");
        let body = r#"{"registryGroup":"EXECUTOR","registryKey":"demo","registryValue":"10.0.0.1:9999"}"#;

        let response = app
            .oneshot(
                Request::post("/api/registry")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(reply_of(response).await.is_success());
    }

    #[tokio::test]
    async fn test_run_job_submits_api_trigger() {
        let (app, _, sink) = build_app("");
        let response = app
            .oneshot(
                Request::post("/api/jobs/7/run")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"executorParam":"k=v"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(reply_of(response).await.is_success());

        let tasks = sink.tasks.lock().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].job_id, 7);
        assert_eq!(tasks[0].trigger_type, TriggerType::Api);
        assert_eq!(tasks[0].executor_param.as_deref(), Some("k=v"));
    }

    #[tokio::test]
    async fn test_callback_envelope() {
        let (app, _, _) = build_app("");
        let body = r#"[{"logId":1,"logDateTime":0,"handleCode":200,"handleMsg":"ok"}]"#;

        let response = app
            .oneshot(
                Request::post("/api/callback")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(reply_of(response).await.is_success());
    }
}
