//! Configuration validation with detailed error reporting.
//!
//! Two levels of checks:
//!
//! - [`validate_structure`]: reserved or blank configuration names and
//!   unknown keys. These reject the whole file.
//! - [`entry_errors`]: malformed connection URLs, zero pool sizes, empty
//!   destinations and half-configured credentials. These disable only
//!   the entry they are found in.
//!
//! [`validate`] runs both and is what `brokerlink validate` reports.

use url::Url;

use super::model::{ConfigEntry, ConfigRegistry, DEFAULT_CONFIG_NAME};
use crate::error::ValidationError;

/// Validate a configuration name. Returns `Ok(())` or a human-readable error.
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("configuration name cannot be empty".into());
    }
    if name == DEFAULT_CONFIG_NAME {
        return Err(format!(
            "'{DEFAULT_CONFIG_NAME}' is reserved for the default configuration"
        ));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(format!("'{name}' must not contain whitespace"));
    }
    Ok(())
}

/// Validate a connection URL. Returns `Ok(())` or a human-readable error.
pub fn validate_url(url: &str) -> Result<(), String> {
    match Url::parse(url) {
        Ok(parsed) if parsed.host_str().is_some_and(|h| !h.is_empty()) => Ok(()),
        Ok(_) => Err(format!("'{url}' has no host")),
        Err(_) => Err(format!("'{url}' is not a valid URL")),
    }
}

fn distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = diagonal + usize::from(ca != *cb);
            diagonal = row[j + 1];
            row[j + 1] = substitution.min(row[j] + 1).min(diagonal + 1);
        }
    }
    row[b.len()]
}

/// The accepted key closest to `key`, if it is a plausible typo.
fn closest_field(key: &str) -> Option<&'static str> {
    let normalized = key.to_lowercase().replace('_', "-");
    ConfigEntry::FIELDS
        .iter()
        .map(|field| (distance(&normalized, field), *field))
        .filter(|(d, _)| *d <= 2)
        .min_by_key(|(d, _)| *d)
        .map(|(_, field)| field)
}

fn unknown_keys(name: &str, entry: &ConfigEntry, errors: &mut Vec<ValidationError>) {
    for key in entry.unknown.keys() {
        errors.push(ValidationError {
            config: name.to_string(),
            field: key.clone(),
            message: "unknown field".into(),
            suggestion: closest_field(key).map(|field| format!("did you mean '{field}'?")),
        });
    }
}

/// Checks whose failure rejects the whole file.
pub fn validate_structure(registry: &ConfigRegistry) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    unknown_keys(DEFAULT_CONFIG_NAME, &registry.default, &mut errors);

    for (name, entry) in &registry.named {
        if let Err(msg) = validate_name(name) {
            errors.push(ValidationError {
                config: if name.is_empty() {
                    "named[\"\"]".into()
                } else {
                    name.clone()
                },
                field: "name".into(),
                message: msg,
                suggestion: (name == DEFAULT_CONFIG_NAME)
                    .then(|| "move these settings to the top level".to_string()),
            });
        }
        unknown_keys(name, entry, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Field errors of one entry. A non-empty result disables that entry.
#[must_use]
pub fn entry_errors(name: &str, entry: &ConfigEntry) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    validate_entry(name, entry, &mut errors);
    errors
}

fn validate_entry(name: &str, entry: &ConfigEntry, errors: &mut Vec<ValidationError>) {
    let push = |errors: &mut Vec<ValidationError>, field: &str, message: String| {
        errors.push(ValidationError {
            config: name.to_string(),
            field: field.into(),
            message,
            suggestion: None,
        });
    };

    if let Some(ref url) = entry.url {
        if let Err(msg) = validate_url(url) {
            errors.push(ValidationError {
                config: name.to_string(),
                field: "url".into(),
                message: msg,
                suggestion: (!url.contains("://")).then(|| format!("did you mean 'tcp://{url}'?")),
            });
        }
    }

    if entry.pool_size == Some(0) {
        push(errors, "pool-size", "pool size must be at least 1".into());
    }

    if entry.destination.as_deref() == Some("") {
        push(errors, "destination", "destination cannot be empty".into());
    }

    // Credentials: both username and password must be set together
    match (&entry.username, &entry.password) {
        (Some(u), Some(p)) => {
            if u.is_empty() {
                push(
                    errors,
                    "username",
                    "username cannot be empty when credentials are configured".into(),
                );
            }
            if p.is_empty() {
                push(
                    errors,
                    "password",
                    "password cannot be empty when credentials are configured".into(),
                );
            }
        }
        (Some(_), None) => push(
            errors,
            "password",
            "password is required when username is set".into(),
        ),
        (None, Some(_)) => push(
            errors,
            "username",
            "username is required when password is set".into(),
        ),
        (None, None) => {}
    }
}

/// Structural checks plus the field checks of every entry.
pub fn validate(registry: &ConfigRegistry) -> Result<(), Vec<ValidationError>> {
    let mut errors = validate_structure(registry).err().unwrap_or_default();

    if !registry.default.is_empty() {
        validate_entry(DEFAULT_CONFIG_NAME, &registry.default, &mut errors);
    }
    for (name, entry) in &registry.named {
        validate_entry(name, entry, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[must_use]
pub fn format_validation_report(path: &str, registry: &ConfigRegistry) -> String {
    let resolved = registry.resolve();
    let health = if registry.is_health_check_enabled() {
        "enabled"
    } else {
        "disabled"
    };
    let mut lines = vec![format!(
        "  {} configurations, health checks {}\n",
        resolved.len(),
        health
    )];

    for (name, entry) in &resolved {
        lines.push(format!(
            "  {}  -> {}",
            name,
            entry.url.as_deref().unwrap_or("(provider default)")
        ));
        lines.push(format!("    destination: {}", entry.destination_or(name)));
        lines.push(format!(
            "    xa: {}",
            if entry.is_xa_enabled() { "on" } else { "off" }
        ));
        if let Some(size) = entry.pool_size {
            lines.push(format!("    pool size: {size}"));
        }
        if entry.is_health_excluded() {
            lines.push("    health: excluded".into());
        }
    }

    format!("{} is valid\n{}", path, lines.join("\n"))
}
