use crate::services::cache::DEFAULT_PRELOAD_COUNT;
use crate::services::session::DEFAULT_INLINE_LIMIT;
use std::path::PathBuf;
use std::str::FromStr;

/// Default upload limit (512MB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Uploaded documents are written here.
    pub library_dir: PathBuf,
    /// Backing directory of the key-value store (cache, rules, progress).
    pub store_dir: PathBuf,
    /// Larger documents are segmented with the streaming scanner.
    pub inline_limit: u64,
    pub preload_count: usize,
    pub default_font_size: f32,
    /// Request body limit for uploads, in bytes.
    pub max_upload_bytes: usize,
    /// Remote book catalog serving chapter text, if any.
    pub catalog_url: Option<String>,
    pub catalog_key: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            library_dir: PathBuf::from("./library"),
            store_dir: PathBuf::from("./store"),
            inline_limit: DEFAULT_INLINE_LIMIT,
            preload_count: DEFAULT_PRELOAD_COUNT,
            default_font_size: 16.0,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            catalog_url: None,
            catalog_key: None,
        }
    }
}

impl AppConfig {
    /// Reads `YUEDU_*` variables, falling back to the defaults for anything
    /// unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: lookup("YUEDU_BIND_ADDR").unwrap_or(defaults.bind_addr),
            library_dir: lookup("YUEDU_LIBRARY_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.library_dir),
            store_dir: lookup("YUEDU_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.store_dir),
            inline_limit: parse_var(&lookup, "YUEDU_INLINE_LIMIT").unwrap_or(defaults.inline_limit),
            preload_count: parse_var(&lookup, "YUEDU_PRELOAD_COUNT").unwrap_or(defaults.preload_count),
            default_font_size: parse_var(&lookup, "YUEDU_FONT_SIZE").unwrap_or(defaults.default_font_size),
            max_upload_bytes: parse_var(&lookup, "YUEDU_MAX_UPLOAD_BYTES")
                .unwrap_or(defaults.max_upload_bytes),
            catalog_url: lookup("YUEDU_CATALOG_URL").filter(|url| !url.trim().is_empty()),
            catalog_key: lookup("YUEDU_CATALOG_KEY"),
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|raw| raw.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn unset_variables_use_defaults() {
        let config = AppConfig::from_lookup(|_| None);
        assert_eq!(config.inline_limit, DEFAULT_INLINE_LIMIT);
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert!(config.catalog_url.is_none());
    }

    #[test]
    fn variables_override_and_bad_numbers_are_ignored() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("YUEDU_BIND_ADDR", "127.0.0.1:9000"),
            ("YUEDU_PRELOAD_COUNT", "5"),
            ("YUEDU_INLINE_LIMIT", "lots"),
            ("YUEDU_MAX_UPLOAD_BYTES", "1048576"),
            ("YUEDU_CATALOG_URL", "http://catalog.local/api"),
        ]);
        let config = AppConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.preload_count, 5);
        assert_eq!(config.inline_limit, DEFAULT_INLINE_LIMIT);
        assert_eq!(config.max_upload_bytes, 1024 * 1024);
        assert_eq!(config.catalog_url.as_deref(), Some("http://catalog.local/api"));
        assert_eq!(config.catalog_key, None);
    }
}
