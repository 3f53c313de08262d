//! Tracing and logging setup shared by every process that embeds the services.

pub mod tracing;

pub use self::tracing::LogSettings;

/// Initialize process-wide logging from `settings`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(settings: &LogSettings) {
    self::tracing::init(settings);
}
