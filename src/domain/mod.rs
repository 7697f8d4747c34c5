//! Core domain types and logic. Nothing in here performs I/O.

pub mod bar;
pub mod split;
pub mod timeframe;
pub mod aggregate;
pub mod series;
pub mod indicator;
pub mod stage;
pub mod config;
pub mod pipeline;
pub mod error;
