//! weft-core — pack, node registry, routing table, and wire format.
//! All other Weft crates depend on this one.

pub mod config;
pub mod pack;
pub mod registry;
pub mod route;
pub mod wire;

pub use config::{AppConfig, ConfigError, FabricConfig};
pub use pack::{Pack, ValidationError};
pub use registry::{NodeEntry, NodeRegistry, UnknownNodeError};
pub use route::{Hop, RouteError, RouterEntry, RouterTable};
