//! The RPC protocol engine (C12): envelope types and per-frame dispatch against
//! the method catalogue. The transport that carries frames lives in `web::ws`.

pub mod dispatch;
pub mod protocol;

pub use dispatch::handle_frame;
pub use protocol::{RequestId, RpcError, RpcNotification, RpcRequest, RpcResponse};
