//! Concrete drivers behind the capability facade.

mod gateway;

pub use gateway::GatewayCapability;
