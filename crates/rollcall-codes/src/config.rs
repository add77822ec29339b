//! Configuration for the code layer.

use std::time::Duration;

use tracing::warn;

use crate::CODE_ALPHABET;

/// How attendance codes are generated, how long they live, and how far a
/// student may be from a geofenced classroom.
#[derive(Debug, Clone)]
pub struct CodeConfig {
    /// How long a code stays redeemable after it is issued.
    ///
    /// Default: 10 minutes.
    pub ttl: Duration,

    /// Number of characters in a code.
    ///
    /// Default: 4, which gives 36^4 = 1 679 616 distinct codes.
    pub code_length: usize,

    /// How many candidates to try before giving up with a capacity error.
    ///
    /// With `n` live codes in a space of size `S`, one candidate collides
    /// with probability `n / S`, so 64 attempts only fail when the space
    /// is practically full.
    pub max_attempts: u32,

    /// Geofence radius in meters. A student exactly on the boundary passes.
    ///
    /// Default: 100 m.
    pub geofence_radius_m: f64,

    /// How often the background sweeper drops expired codes.
    ///
    /// Default: 30 seconds. Expired codes are never returned even between
    /// sweeps; sweeping only frees memory.
    pub sweep_interval: Duration,
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10 * 60),
            code_length: 4,
            max_attempts: 64,
            geofence_radius_m: 100.0,
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl CodeConfig {
    /// Longest code we accept. 36^12 already overflows any classroom.
    pub const MAX_CODE_LENGTH: usize = 12;

    /// Number of distinct codes this configuration can produce.
    pub fn code_space(&self) -> u64 {
        (CODE_ALPHABET.len() as u64).saturating_pow(self.code_length as u32)
    }

    /// Clamps out-of-range values so the config is safe to use.
    ///
    /// Rules:
    /// - `code_length` clamped to `1..=MAX_CODE_LENGTH`.
    /// - `max_attempts` at least 1.
    /// - zero `ttl` or `sweep_interval` fall back to the defaults.
    /// - a negative or non-finite `geofence_radius_m` falls back to 100 m.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();

        if self.code_length == 0 || self.code_length > Self::MAX_CODE_LENGTH {
            let clamped = self.code_length.clamp(1, Self::MAX_CODE_LENGTH);
            warn!(
                code_length = self.code_length,
                clamped, "code_length out of range, clamping"
            );
            self.code_length = clamped;
        }
        if self.max_attempts == 0 {
            warn!("max_attempts is 0, using 1");
            self.max_attempts = 1;
        }
        if self.ttl.is_zero() {
            warn!(default = ?defaults.ttl, "ttl is zero, using default");
            self.ttl = defaults.ttl;
        }
        if self.sweep_interval.is_zero() {
            warn!(default = ?defaults.sweep_interval, "sweep_interval is zero, using default");
            self.sweep_interval = defaults.sweep_interval;
        }
        if !self.geofence_radius_m.is_finite() || self.geofence_radius_m < 0.0 {
            warn!(
                radius = self.geofence_radius_m,
                "geofence_radius_m invalid, using default"
            );
            self.geofence_radius_m = defaults.geofence_radius_m;
        }
        self
    }
}
