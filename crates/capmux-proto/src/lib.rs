pub mod endpoint;
pub mod handler;
pub mod protocol;

#[cfg(test)]
mod protocol_tests;

pub use endpoint::ProtocolEndpoint;
pub use handler::*;
pub use protocol::*;
