//! Transports the endpoint can be served over. Both run until their input
//! closes or the shared cancellation token fires.

pub(crate) mod session;
pub mod sse;
pub mod stdio;
