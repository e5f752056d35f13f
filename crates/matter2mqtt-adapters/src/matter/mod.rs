//! Matter server WebSocket integration.
//!
//! The snapshot source and the command channel each hold their own
//! connection, so a slow device command never delays a refresh.

pub mod commander;
pub mod rpc;
pub mod source;

pub use commander::MatterWsCommandChannel;
pub use rpc::{MatterRpc, RpcError};
pub use source::MatterWsSource;
