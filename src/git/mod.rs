pub mod materialize;
pub mod remote;
pub mod repo;
