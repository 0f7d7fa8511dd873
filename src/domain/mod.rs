//! Domain layer: platform entities and the ports the application talks through.

pub mod learning;
pub mod payment;
pub mod plan;
pub mod ports;
pub mod session;
