//! weft-client — the RC endpoint: scoped background listener, send path,
//! and batched receive.

mod assemble;
mod endpoint;

pub use endpoint::{Endpoint, EndpointError, RecvError, SendError, ShutdownHandle};
