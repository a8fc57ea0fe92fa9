//! weft-router — the RS node: admission, relay, and local delivery.

mod buffer;
mod forward;
mod server;

pub use server::{Router, RouterConfig, RouterError, RouterTuning};
