//! Configuration access port trait.
//!
//! Sections read by stagewise: `[indicators]`, `[stage]`, `[pipeline]`,
//! `[sqlite]` and `[csv]`.

use crate::domain::error::StagewiseError;

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn get_int(&self, section: &str, key: &str, default: i64) -> i64;
    fn get_double(&self, section: &str, key: &str, default: f64) -> f64;
    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool;

    /// Reads a key that has no sensible default.
    fn require_string(&self, section: &str, key: &str) -> Result<String, StagewiseError> {
        self.get_string(section, key)
            .ok_or_else(|| StagewiseError::ConfigMissing {
                section: section.to_string(),
                key: key.to_string(),
            })
    }
}
