//! Configuration validation.

use crate::schema::TabhostConfig;
use tabhost_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &TabhostConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_range(
        &mut errors,
        "channel.query_timeout_ms",
        config.channel.query_timeout_ms,
        1,
        120_000,
    );
    if config.channel.max_frame_bytes < 1024 {
        errors.push(format!(
            "channel.max_frame_bytes = {} is below the minimum of 1024",
            config.channel.max_frame_bytes
        ));
    }

    validate_range(
        &mut errors,
        "supervisor.spawn_ready_timeout_ms",
        config.supervisor.spawn_ready_timeout_ms,
        1,
        120_000,
    );
    validate_range(
        &mut errors,
        "supervisor.reap_grace_ms",
        config.supervisor.reap_grace_ms,
        0,
        60_000,
    );
    if let Some(path) = &config.supervisor.plug_executable {
        if path.as_os_str().is_empty() {
            errors.push("supervisor.plug_executable must not be empty".into());
        }
    }

    validate_range(
        &mut errors,
        "session.autosave_interval_secs",
        config.session.autosave_interval_secs,
        0,
        3600,
    );

    validate_range(
        &mut errors,
        "closed_tabs.capacity",
        config.closed_tabs.capacity,
        1,
        500,
    );

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}

fn validate_range(errors: &mut Vec<String>, name: &str, value: u32, min: u32, max: u32) {
    if value < min || value > max {
        errors.push(format!("{name} = {value} is out of range [{min}, {max}]"));
    }
}
