use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use jobcenter_core::constants::ACCESS_TOKEN_HEADER;
use jobcenter_domain::messages::{RpcReply, TriggerRequest};
use jobcenter_domain::ports::ExecutorClient;

/// 连接超时，探测类接口要快速失败好让路由器跳到下一个地址
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
/// 整体请求超时
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// 执行器HTTP客户端
///
/// 按`{address}/{endpoint}`拼接URL发JSON请求。传输层故障
/// （拒绝连接、超时、应答不是合法JSON）统一折叠为失败应答，
/// 调用方只看`code`。
pub struct HttpExecutorClient {
    client: reqwest::Client,
    access_token: String,
}

impl HttpExecutorClient {
    pub fn new(access_token: String) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            access_token,
        }
    }

    async fn post<B: Serialize>(&self, address: &str, endpoint: &str, body: &B) -> RpcReply<String> {
        let url = format!("{}/{}", address.trim_end_matches('/'), endpoint);
        let mut request = self.client.post(&url).json(body);
        if !self.access_token.is_empty() {
            request = request.header(ACCESS_TOKEN_HEADER, &self.access_token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return RpcReply::fail(format!("执行器调用失败: {url} {e}")),
        };

        match response.json::<RpcReply<serde_json::Value>>().await {
            Ok(reply) => {
                debug!("执行器应答: url={} code={}", url, reply.code);
                RpcReply {
                    code: reply.code,
                    msg: reply.msg,
                    content: reply.content.map(|v| match v {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    }),
                }
            }
            Err(e) => RpcReply::fail(format!("执行器应答解析失败: {url} {e}")),
        }
    }
}

#[async_trait]
impl ExecutorClient for HttpExecutorClient {
    async fn beat(&self, address: &str) -> RpcReply<String> {
        self.post(address, "beat", &json!({})).await
    }

    async fn idle_beat(&self, address: &str, job_id: i64) -> RpcReply<String> {
        self.post(address, "idleBeat", &json!({ "jobId": job_id })).await
    }

    async fn run(&self, address: &str, request: &TriggerRequest) -> RpcReply<String> {
        self.post(address, "run", request).await
    }

    async fn kill(&self, address: &str, job_id: i64) -> RpcReply<String> {
        self.post(address, "kill", &json!({ "jobId": job_id })).await
    }
}
