//! Packet capture, TCP reassembly, and HTTP/TLS recognition — the parsing
//! core shared by every capture interface.

pub mod buffer_pool;
pub mod dispatcher;
pub mod models;
pub mod pairer;
pub mod parser;
pub mod reassembly;

pub use buffer_pool::{BufferPool, PoolBuffer, PoolError};
pub use dispatcher::{DispatchEvent, Dispatcher};
pub use pairer::{PairedExchange, Pairer};
