//! 执行器侧HTTP接口：结果回调、注册/摘除、健康检查与指标导出。

pub mod handlers;
pub mod middleware;
pub mod routes;

pub use routes::{create_routes, AppState};
