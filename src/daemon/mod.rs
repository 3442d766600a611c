pub mod manager;
pub mod server;
