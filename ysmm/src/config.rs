//! Engine configuration.
//!
//! Read from the first `ysmm/config.json` found in XDG config directories,
//! environment variables `YSMM_DEBUG` and `YSMM_BENCH` take precedence.

use nanoserde::DeJson;

/// Configuration file contents, all fields are optional
#[derive(Debug, Clone, Default, PartialEq, DeJson)]
pub struct Config {
    /// Benchmark kernel variants and keep the fastest one.
    /// default = true
    pub autotune: Option<bool>,
    /// Number of timed launches per variant.
    /// default = 50
    pub bench_iterations: Option<usize>,
    /// Use simple one work item per element kernel instead of tiled one.
    /// default = false
    pub basic_kernel: Option<bool>,
    /// Extra `OpenCL` compiler options
    pub build_options: Option<String>,
    /// Debug print mask, see [`DebugMask`]
    pub debug: Option<u32>,
}

/// Which diagnostics are printed to stdout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugMask(pub u32);

impl DebugMask {
    /// Device probing, handle and kernel object creation
    #[must_use]
    pub const fn dev(self) -> bool {
        self.0 % 2 == 1
    }

    /// Rendered kernel sources
    #[must_use]
    pub const fn source(self) -> bool {
        (self.0 >> 1) % 2 == 1
    }

    /// Autotuning timings
    #[must_use]
    pub const fn tune(self) -> bool {
        (self.0 >> 2) % 2 == 1
    }

    /// Program cache hits and misses
    #[must_use]
    pub const fn cache(self) -> bool {
        (self.0 >> 3) % 2 == 1
    }
}

const DEFAULT_BENCH_ITERATIONS: usize = 50;

impl Config {
    /// Loads configuration file and applies environment overrides.
    /// Missing or malformed file means defaults.
    #[must_use]
    pub fn load() -> Config {
        let mut config = Config::default();
        config.apply_overrides(std::env::var("YSMM_DEBUG").ok().as_deref(), None);
        let debug = config.debug_mask().dev();
        let mut config = xdg::BaseDirectories::new()
            .map_err(|e| {
                if debug {
                    println!("Failed to find config directories for config.json, {e}");
                }
            })
            .ok()
            .map(|bd| {
                let mut dirs = bd.get_config_dirs();
                dirs.push(bd.get_config_home());
                dirs
            })
            .and_then(|paths| {
                paths.into_iter().find_map(|mut path| {
                    path.push("ysmm/config.json");
                    std::fs::read_to_string(&path).ok()
                })
            })
            .and_then(|file| {
                Config::from_json(&file)
                    .map_err(|e| {
                        if debug {
                            println!("Failed to parse config.json, {e}");
                        }
                    })
                    .ok()
            })
            .inspect(|_| {
                if debug {
                    println!("Config successfully read and parsed.");
                }
            })
            .unwrap_or_default();
        config.apply_overrides(
            std::env::var("YSMM_DEBUG").ok().as_deref(),
            std::env::var("YSMM_BENCH").ok().as_deref(),
        );
        config
    }

    /// Parses configuration from JSON text
    pub fn from_json(json: &str) -> Result<Config, nanoserde::DeJsonErr> {
        Config::deserialize_json(json)
    }

    /// Applies values of `YSMM_DEBUG` and `YSMM_BENCH`, unparsable values are ignored
    pub fn apply_overrides(&mut self, debug: Option<&str>, bench: Option<&str>) {
        if let Some(x) = debug.and_then(|x| x.trim().parse::<u32>().ok()) {
            self.debug = Some(x);
        }
        if let Some(x) = bench.and_then(|x| x.trim().parse::<usize>().ok()) {
            self.bench_iterations = Some(x);
        }
    }

    #[must_use]
    pub fn autotune(&self) -> bool {
        self.autotune.unwrap_or(true)
    }

    /// Timed launches per variant, at least one
    #[must_use]
    pub fn bench_iterations(&self) -> usize {
        self.bench_iterations.unwrap_or(DEFAULT_BENCH_ITERATIONS).max(1)
    }

    #[must_use]
    pub fn basic_kernel(&self) -> bool {
        self.basic_kernel.unwrap_or(false)
    }

    /// Compiler options passed to every program build
    #[must_use]
    pub fn build_options(&self) -> String {
        match &self.build_options {
            Some(extra) if !extra.trim().is_empty() => format!("-cl-fast-relaxed-math {}", extra.trim()),
            _ => "-cl-fast-relaxed-math".into(),
        }
    }

    #[must_use]
    pub fn debug_mask(&self) -> DebugMask {
        DebugMask(self.debug.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, DebugMask};

    #[test]
    fn defaults() {
        let config = Config::default();
        assert!(config.autotune());
        assert_eq!(config.bench_iterations(), 50);
        assert!(!config.basic_kernel());
        assert_eq!(config.build_options(), "-cl-fast-relaxed-math");
        assert_eq!(config.debug_mask(), DebugMask(0));
    }

    #[test]
    fn parse_partial() {
        let config = Config::from_json(r#"{"autotune": false, "bench_iterations": 5}"#).unwrap();
        assert!(!config.autotune());
        assert_eq!(config.bench_iterations(), 5);
        assert!(!config.basic_kernel());
        assert!(Config::from_json("{ not json").is_err());
    }

    #[test]
    fn env_overrides() {
        let mut config = Config { bench_iterations: Some(10), ..Config::default() };
        config.apply_overrides(Some("12"), Some("x"));
        assert_eq!(config.bench_iterations(), 10);
        let mask = config.debug_mask();
        assert!(!mask.dev() && !mask.source() && mask.tune() && mask.cache());
        config.apply_overrides(None, Some("0"));
        assert_eq!(config.bench_iterations(), 1);
    }
}
