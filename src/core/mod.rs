pub mod emitter;
pub mod error;
pub mod handle;
pub mod id;
pub mod monitor;
pub mod state;
pub mod types;
