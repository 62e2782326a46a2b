//! Application configuration
//!
//! Settings that come from the command line rather than the run
//! configuration document.

/// Application configuration structure
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Verbosity level for logging
    pub verbose: u8,
    /// Show a progress bar while units run
    pub progress: bool,
    /// Exit non-zero when any unit failed
    pub strict: bool,
}

impl AppConfig {
    pub fn new(verbose: u8) -> Self {
        Self {
            verbose,
            progress: true,
            strict: false,
        }
    }

    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Filter directive for the verbosity level
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_by_verbosity() {
        assert_eq!(AppConfig::new(0).log_level(), "info");
        assert_eq!(AppConfig::new(1).log_level(), "debug");
        assert_eq!(AppConfig::new(2).log_level(), "trace");
        assert_eq!(AppConfig::new(5).log_level(), "trace");
    }

    #[test]
    fn test_builders() {
        let config = AppConfig::new(1).with_progress(false).with_strict(true);
        assert!(!config.progress);
        assert!(config.strict);
    }
}
