mod connection;
mod registry;

pub use connection::{ConnEvent, ConnId, Connection, ConnectionInfo, ConnectionOptions};
pub use registry::LiveConnections;
