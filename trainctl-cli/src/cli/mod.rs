pub mod commands;
pub mod error;
pub mod logging;

use std::path::Path;

use trainctl::Settings;

// Re-export command structures
pub use commands::{runs::RunsCommand, serve::ServeCommand};

// Re-export error types
pub use error::{CliError, CliResult};

/// Operational settings from an optional file plus `TRAINCTL__*` overrides
pub fn load_settings(path: Option<&str>) -> CliResult<Settings> {
    Ok(Settings::load(path.map(Path::new))?)
}
