//! Logger setup for the `depthcast` binary.
//!
//! `RUST_LOG` wins over the configured level. With `logging.file` set, log
//! lines are appended there instead of going to stderr; stdout stays clean
//! for the single-shot JSON payload.

use std::fs::OpenOptions;

use anyhow::{Context, Result};

use crate::config::LoggingSettings;

pub fn init(settings: &LoggingSettings) -> Result<()> {
    let mut builder = builder(settings)?;
    builder
        .try_init()
        .context("logger already initialized")?;
    Ok(())
}

/// Configured but not installed; split out so tests can inspect it.
pub fn builder(settings: &LoggingSettings) -> Result<env_logger::Builder> {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(settings.level.as_str()),
    );
    if let Some(path) = settings.file.as_deref() {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create log directory {}", dir.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
        builder.write_style(env_logger::WriteStyle::Never);
    }
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_is_created_with_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("depthcast.log");
        let settings = LoggingSettings {
            level: "debug".to_string(),
            file: Some(path.clone()),
        };
        builder(&settings).expect("builder");
        assert!(path.exists());
    }

    #[test]
    fn unwritable_log_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LoggingSettings {
            level: "info".to_string(),
            // A directory cannot be opened for appending.
            file: Some(dir.path().to_path_buf()),
        };
        assert!(builder(&settings).is_err());
    }
}
