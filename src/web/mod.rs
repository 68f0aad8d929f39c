//! HTTP surface: the WebSocket RPC transport and the plain file surface that
//! serves recordings/snapshots by canonical filename.

mod files;
mod routes;
mod ws;

pub use routes::create_router;
pub use ws::ws_handler;
