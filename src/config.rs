use std::{
    collections::HashMap,
    fmt::{Display, Formatter},
};

pub struct Config {
    pub cache_dir: String,
    pub cache_capacity_bytes: u64,
    pub cache_max_segments: usize,
    pub segment_max_size_bytes: u64,
    pub download_wait_timeout_ms: u64,
    pub worker_threads: usize,
    pub prometheus_textfile_dir: Option<String>,
}

impl Config {
    pub fn from_env(vars: &HashMap<String, String>) -> Self {
        let config = Self {
            cache_dir: vars
                .get("CACHE_DIR")
                .cloned()
                .expect("CACHE_DIR is required"),
            cache_capacity_bytes: vars
                .get("CACHE_CAPACITY_BYTES")
                .map(|s| s.parse().expect("invalid CACHE_CAPACITY_BYTES"))
                .unwrap_or(1_073_741_824),
            cache_max_segments: vars
                .get("CACHE_MAX_SEGMENTS")
                .map(|s| s.parse().expect("invalid CACHE_MAX_SEGMENTS"))
                .unwrap_or(1_048_576),
            segment_max_size_bytes: vars
                .get("SEGMENT_MAX_SIZE_BYTES")
                .map(|s| s.parse().expect("invalid SEGMENT_MAX_SIZE_BYTES"))
                .unwrap_or(4_194_304),
            download_wait_timeout_ms: vars
                .get("DOWNLOAD_WAIT_TIMEOUT_MS")
                .map(|s| s.parse().expect("invalid DOWNLOAD_WAIT_TIMEOUT_MS"))
                .unwrap_or(5_000),
            worker_threads: vars
                .get("WORKER_THREADS")
                .map(|s| s.parse().expect("invalid WORKER_THREADS"))
                .unwrap_or(4),
            prometheus_textfile_dir: vars.get("PROMETHEUS_TEXTFILE_DIR").cloned(),
        };

        config.validate();
        config
    }

    fn validate(&self) {
        if self.cache_capacity_bytes < self.segment_max_size_bytes {
            panic!(
                "Invalid configuration: cache_capacity_bytes ({}) must be >= segment_max_size_bytes ({})",
                self.cache_capacity_bytes, self.segment_max_size_bytes
            );
        }

        if self.segment_max_size_bytes == 0 {
            panic!("Invalid configuration: segment_max_size_bytes must be greater than 0");
        }

        if self.cache_max_segments == 0 {
            panic!("Invalid configuration: cache_max_segments must be greater than 0");
        }

        if self.download_wait_timeout_ms == 0 {
            panic!("Invalid configuration: download_wait_timeout_ms must be greater than 0");
        }

        if self.worker_threads == 0 {
            panic!("Invalid configuration: worker_threads must be greater than 0");
        }
    }
}

impl Display for Config {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Config{{ cache_dir: {}, cache_capacity_bytes: {}, cache_max_segments: {}, \
             segment_max_size_bytes: {}, download_wait_timeout_ms: {}, worker_threads: {}, \
             prometheus_textfile_dir: {:?} }}",
            self.cache_dir,
            self.cache_capacity_bytes,
            self.cache_max_segments,
            self.segment_max_size_bytes,
            self.download_wait_timeout_ms,
            self.worker_threads,
            self.prometheus_textfile_dir,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_env() -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("CACHE_DIR".to_string(), "/tmp/segment-cache".to_string());
        env
    }

    #[test]
    fn config_valid() {
        let env = minimal_env();
        let config = Config::from_env(&env);
        assert_eq!(config.cache_capacity_bytes, 1_073_741_824);
        assert_eq!(config.segment_max_size_bytes, 4_194_304);
        assert_eq!(config.download_wait_timeout_ms, 5_000);
    }

    #[test]
    #[should_panic(expected = "cache_capacity_bytes")]
    fn config_capacity_below_segment_size() {
        let mut env = minimal_env();
        env.insert("CACHE_CAPACITY_BYTES".to_string(), "1000".to_string());
        env.insert("SEGMENT_MAX_SIZE_BYTES".to_string(), "2000".to_string());
        Config::from_env(&env);
    }

    #[test]
    #[should_panic(expected = "cache_max_segments")]
    fn config_zero_max_segments() {
        let mut env = minimal_env();
        env.insert("CACHE_MAX_SEGMENTS".to_string(), "0".to_string());
        Config::from_env(&env);
    }

    #[test]
    #[should_panic(expected = "download_wait_timeout_ms")]
    fn config_zero_wait_timeout() {
        let mut env = minimal_env();
        env.insert("DOWNLOAD_WAIT_TIMEOUT_MS".to_string(), "0".to_string());
        Config::from_env(&env);
    }

    #[test]
    #[should_panic(expected = "worker_threads")]
    fn config_zero_worker_threads() {
        let mut env = minimal_env();
        env.insert("WORKER_THREADS".to_string(), "0".to_string());
        Config::from_env(&env);
    }
}
