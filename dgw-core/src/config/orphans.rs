use std::time::Duration;

/// Orphan sweep settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanConfig {
    pub enabled: bool,
    /// Limbo entries younger than this are left alone.
    pub horizon: Duration,
    /// Time between sweep passes.
    pub interval: Duration,
    /// Upper bound on entries handled per pass.
    pub max_per_execute: usize,
}

impl Default for OrphanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            horizon: Duration::from_secs(20 * 60),
            interval: Duration::from_secs(300),
            max_per_execute: 500,
        }
    }
}
