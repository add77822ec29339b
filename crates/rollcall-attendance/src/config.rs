//! Configuration for the attendance layer.

use std::time::Duration;

use rollcall_codes::CodeConfig;

/// Settings for [`AttendanceService`](crate::AttendanceService).
#[derive(Debug, Clone)]
pub struct AttendanceConfig {
    /// Code generation, TTL, and geofence settings.
    pub codes: CodeConfig,

    /// Upper bound on every collaborator call (directory queries, roster
    /// preparation, marking present). A call that takes longer fails the
    /// request with [`AttendanceError::Timeout`](crate::AttendanceError::Timeout).
    ///
    /// Default: 5 seconds.
    pub hook_timeout: Duration,
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            codes: CodeConfig::default(),
            hook_timeout: Duration::from_secs(5),
        }
    }
}
