//! Port traits for the collaborators the pipeline reads from and writes to.

pub mod config_port;
pub mod data_port;
pub mod store_port;
