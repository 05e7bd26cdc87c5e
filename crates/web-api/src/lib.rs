//! Web API 层。
//!
//! 提供 Axum 路由与 WebSocket 网关：HTTP 请求委托给应用层的用例
//! 服务，实时事件经会话注册表按路由策略扇出到 WebSocket 连接。

mod auth;
mod error;
mod protocol;
mod registry;
mod routes;
mod state;
mod websocket;

pub use auth::JwtService;
pub use error::ApiError;
pub use protocol::{ClientFrame, ControlFrame};
pub use registry::{run_event_pump, SessionRegistry};
pub use routes::router;
pub use state::AppState;
