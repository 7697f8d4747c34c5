//! INI file configuration adapter.

use crate::domain::error::StagewiseError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

pub struct FileConfigAdapter {
    ini: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, StagewiseError> {
        let path = path.as_ref();
        let mut ini = Ini::new();
        ini.load(path).map_err(|reason| StagewiseError::ConfigParse {
            file: path.display().to_string(),
            reason,
        })?;
        Ok(Self { ini })
    }

    pub fn from_string(content: &str) -> Result<Self, StagewiseError> {
        let mut ini = Ini::new();
        ini.read(content.to_string())
            .map_err(|reason| StagewiseError::ConfigParse {
                file: "<string>".into(),
                reason,
            })?;
        Ok(Self { ini })
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.trim().to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        }
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.ini.get(section, key).filter(|v| !v.trim().is_empty())
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.ini
            .getint(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.ini
            .getfloat(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.ini
            .get(section, key)
            .as_deref()
            .and_then(Self::parse_bool)
            .unwrap_or(default)
    }
}
