//! Semantic checks on a resolved [`ConductorConfig`].
//!
//! [`validate`] looks only at values and runs on every load. [`preflight`]
//! also probes `PATH` and runs once before a loop starts.

use tracing::debug;

use super::ConductorConfig;
use crate::error::{ConductorError, Result};
use crate::isolation::is_loopback_url;

/// Reject values no component can run with.
///
/// # Errors
///
/// Returns [`ConductorError::InvalidConfig`] naming the first bad field.
pub fn validate(config: &ConductorConfig) -> Result<()> {
    let guardian = &config.guardian;
    // Zero or negative is allowed and stops the loop before its first pass.
    if !guardian.max_time_minutes.is_finite() {
        return Err(ConductorError::invalid(
            "guardian.max_time_minutes",
            "must be a finite number",
        ));
    }
    if !guardian.base_temperature.is_finite() || guardian.base_temperature < 0.0 {
        return Err(ConductorError::invalid(
            "guardian.base_temperature",
            "must be a finite, non-negative number",
        ));
    }
    if guardian.completion_promise.trim().is_empty() {
        return Err(ConductorError::invalid(
            "guardian.completion_promise",
            "must not be empty",
        ));
    }

    if config.task.attempt_ceiling == 0 {
        return Err(ConductorError::invalid("task.attempt_ceiling", "must be at least 1"));
    }

    for (field, secs) in [
        ("bist.timeout_secs", config.bist.timeout_secs),
        ("isolation.service_timeout_secs", config.isolation.service_timeout_secs),
        ("isolation.git_timeout_secs", config.isolation.git_timeout_secs),
        ("generator.timeout_secs", config.generator.timeout_secs),
        ("verify.timeout_secs", config.verify.timeout_secs),
        ("context.command_timeout_secs", config.context.command_timeout_secs),
    ] {
        if secs == 0 {
            return Err(ConductorError::invalid(field, "timeout must be greater than zero"));
        }
    }

    if let Some(url) = &config.isolation.service_url {
        if !is_loopback_url(url) {
            return Err(ConductorError::invalid(
                "isolation.service_url",
                format!("'{url}' is not a loopback address"),
            ));
        }
    }

    check_command("generator.command", &config.generator.command)?;
    check_command("verify.command", &config.verify.command)?;
    check_command("context.command", &config.context.command)?;

    for (ext, command) in &config.bist.interpreters {
        if command.is_empty() {
            return Err(ConductorError::invalid(
                format!("bist.interpreters.{ext}"),
                "interpreter command must not be empty",
            ));
        }
        check_command(&format!("bist.interpreters.{ext}"), command)?;
    }

    if config.required_tools.iter().any(|t| t.trim().is_empty()) {
        return Err(ConductorError::invalid("required_tools", "tool names must not be empty"));
    }

    Ok(())
}

/// An empty command means "not configured"; a present one needs a program.
fn check_command(field: &str, command: &[String]) -> Result<()> {
    match command.first() {
        Some(program) if program.trim().is_empty() => {
            Err(ConductorError::invalid(field, "program must not be empty"))
        }
        _ => Ok(()),
    }
}

/// Confirm the environment can run a loop with this configuration.
///
/// # Errors
///
/// Returns [`ConductorError::MissingTool`] for a required tool or generator
/// program not on `PATH`, and [`ConductorError::Config`] when no generator
/// command is configured.
pub fn preflight(config: &ConductorConfig) -> Result<()> {
    for tool in &config.required_tools {
        which::which(tool).map_err(|_| ConductorError::MissingTool { tool: tool.clone() })?;
        debug!("Found required tool {tool}");
    }

    let Some(program) = config.generator.command.first() else {
        return Err(ConductorError::config(
            "generator.command is not configured; set it in .conductor/config.toml",
        ));
    };
    which::which(program).map_err(|_| ConductorError::MissingTool {
        tool: program.clone(),
    })?;
    Ok(())
}
