pub mod broadcaster;
pub mod connection_registry;
