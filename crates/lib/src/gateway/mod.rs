//! Gateway: HTTP + WebSocket front door for the web widget.
//!
//! Single port serves the widget endpoints under `/webhook/web` and a health probe at `/`.

mod protocol;
mod server;

pub use protocol::{SocketMethod, WsRequest, WsResponse, PROTOCOL_VERSION};
pub use server::{run_gateway, GatewayState};
