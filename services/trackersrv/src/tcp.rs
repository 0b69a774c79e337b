//! GPRS device sockets
//!
//! - `codec`: frame splitting
//! - `classifier`: model and identity from frame shape
//! - `link`: per-connection write handle
//! - `server`: accept loop feeding [`TcpInbound`] events to the router

pub mod classifier;
pub mod codec;
pub mod link;
pub mod server;

pub use classifier::{classify, Classification, FrameKind, TcpEvent, TcpModel};
pub use link::TcpLink;
pub use server::{TcpInbound, TcpServer};
