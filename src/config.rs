//! Extraction limits.
//!
//! Limits come from built-in defaults or from `SAFE_TGZ_*` environment
//! variables. A variable that is missing or does not parse falls back to
//! its default; a value of zero is refused.

use std::env;
use thiserror::Error;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;
pub const DEFAULT_MAX_TOTAL_SIZE: u64 = 500 * 1024 * 1024;
pub const DEFAULT_MAX_FILES: u64 = 10_000;
pub const DEFAULT_MAX_PATH_DEPTH: usize = 20;
pub const DEFAULT_MAX_COMPONENT_LEN: usize = 255;
pub const DEFAULT_MAX_PATH_LEN: usize = 4096;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LimitsError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Archive-wide and per-entry ceilings enforced by the extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Largest declared size of a single entry.
    pub max_file_size: u64,
    /// Ceiling on the sum of declared sizes across the archive.
    pub max_total_size: u64,
    /// Maximum number of header records (of any type).
    pub max_files: u64,
    /// Maximum number of components in an entry path.
    pub max_path_depth: usize,
    /// Maximum length of a single path component.
    pub max_component_len: usize,
    /// Maximum length of the full logical path (prefix + name).
    pub max_path_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_total_size: DEFAULT_MAX_TOTAL_SIZE,
            max_files: DEFAULT_MAX_FILES,
            max_path_depth: DEFAULT_MAX_PATH_DEPTH,
            max_component_len: DEFAULT_MAX_COMPONENT_LEN,
            max_path_len: DEFAULT_MAX_PATH_LEN,
        }
    }
}

impl Limits {
    /// Reads limits from the process environment.
    pub fn from_env() -> Result<Self, LimitsError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads limits through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, LimitsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn read<T: std::str::FromStr>(
            lookup: &dyn Fn(&str) -> Option<String>,
            key: &str,
            default: T,
        ) -> T {
            match lookup(key) {
                Some(value) => value.trim().parse().unwrap_or_else(|_| {
                    log::warn!("ignoring unparseable {}={:?}", key, value);
                    default
                }),
                None => default,
            }
        }

        let limits = Self {
            max_file_size: read(&lookup, "SAFE_TGZ_MAX_FILE_SIZE", DEFAULT_MAX_FILE_SIZE),
            max_total_size: read(&lookup, "SAFE_TGZ_MAX_TOTAL_SIZE", DEFAULT_MAX_TOTAL_SIZE),
            max_files: read(&lookup, "SAFE_TGZ_MAX_FILES", DEFAULT_MAX_FILES),
            max_path_depth: read(&lookup, "SAFE_TGZ_MAX_PATH_DEPTH", DEFAULT_MAX_PATH_DEPTH),
            max_component_len: read(
                &lookup,
                "SAFE_TGZ_MAX_COMPONENT_LENGTH",
                DEFAULT_MAX_COMPONENT_LEN,
            ),
            max_path_len: read(&lookup, "SAFE_TGZ_MAX_PATH_LENGTH", DEFAULT_MAX_PATH_LEN),
        };
        limits.validate()?;
        Ok(limits)
    }

    pub fn validate(&self) -> Result<(), LimitsError> {
        if self.max_file_size == 0 {
            return Err(LimitsError::Zero("max_file_size"));
        }
        if self.max_total_size == 0 {
            return Err(LimitsError::Zero("max_total_size"));
        }
        if self.max_files == 0 {
            return Err(LimitsError::Zero("max_files"));
        }
        if self.max_path_depth == 0 {
            return Err(LimitsError::Zero("max_path_depth"));
        }
        if self.max_component_len == 0 {
            return Err(LimitsError::Zero("max_component_len"));
        }
        if self.max_path_len == 0 {
            return Err(LimitsError::Zero("max_path_len"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_limits_defaults() {
        let limits = Limits::from_lookup(|_| None).unwrap();
        assert_eq!(limits, Limits::default());
        assert_eq!(limits.max_file_size, 100 * 1024 * 1024);
        assert_eq!(limits.max_total_size, 500 * 1024 * 1024);
        assert_eq!(limits.max_files, 10_000);
        assert_eq!(limits.max_path_depth, 20);
        assert_eq!(limits.max_component_len, 255);
        assert_eq!(limits.max_path_len, 4096);
    }

    #[test]
    fn test_limits_from_lookup() {
        let limits = Limits::from_lookup(lookup_from(&[
            ("SAFE_TGZ_MAX_FILE_SIZE", "1024"),
            ("SAFE_TGZ_MAX_TOTAL_SIZE", " 4096 "),
            ("SAFE_TGZ_MAX_FILES", "3"),
            ("SAFE_TGZ_MAX_PATH_DEPTH", "4"),
            ("SAFE_TGZ_MAX_COMPONENT_LENGTH", "16"),
            ("SAFE_TGZ_MAX_PATH_LENGTH", "64"),
        ]))
        .unwrap();
        assert_eq!(limits.max_file_size, 1024);
        assert_eq!(limits.max_total_size, 4096);
        assert_eq!(limits.max_files, 3);
        assert_eq!(limits.max_path_depth, 4);
        assert_eq!(limits.max_component_len, 16);
        assert_eq!(limits.max_path_len, 64);
    }

    #[test]
    fn test_unparseable_value_falls_back() {
        let limits =
            Limits::from_lookup(lookup_from(&[("SAFE_TGZ_MAX_FILES", "lots")])).unwrap();
        assert_eq!(limits.max_files, DEFAULT_MAX_FILES);
    }

    #[test]
    fn test_zero_is_rejected() {
        let err = Limits::from_lookup(lookup_from(&[("SAFE_TGZ_MAX_TOTAL_SIZE", "0")]))
            .unwrap_err();
        assert_eq!(err, LimitsError::Zero("max_total_size"));
    }
}
