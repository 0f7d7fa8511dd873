//! Adapters behind the domain ports: HTTP, in-memory, and credential storage.

pub mod credentials;
pub mod http;
pub mod in_memory;
