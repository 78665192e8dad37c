//! Monitor server
//!
//! An independent liveness witness: it keeps its own connections to the
//! backing nodes and answers `GET /monitor/{address}` with whether the
//! node replied to PING. The interface server counts one vote per monitor.

pub mod http;
pub mod pool;
pub mod server;

pub use pool::NodePool;
pub use server::MonitorServer;
