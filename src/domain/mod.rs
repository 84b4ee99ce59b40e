// Domain layer: notice models and the storage / chain ports.

pub mod model;
pub mod ports;
