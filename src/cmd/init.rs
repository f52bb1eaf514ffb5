//! `brokerlink init`: generate a starter configuration file.
//!
//! Creates a YAML, JSON, or TOML config file with either minimal
//! or fully documented templates.

use std::path::PathBuf;

use crate::cli::{ConfigFormat, InitArgs};
use crate::error::BrokerlinkError;

pub fn execute(args: &InitArgs) -> Result<(), BrokerlinkError> {
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("brokerlink.{}", args.format.extension())));

    if output.exists() {
        return Err(BrokerlinkError::FileExists { path: output });
    }

    std::fs::write(&output, template(&args.format, args.full))?;
    println!("Created {}", output.display());
    Ok(())
}

#[must_use]
pub const fn template(format: &ConfigFormat, full: bool) -> &'static str {
    match (format, full) {
        (ConfigFormat::Yaml, false) => YAML_MINIMAL,
        (ConfigFormat::Yaml, true) => YAML_FULL,
        (ConfigFormat::Json, false) => JSON_MINIMAL,
        (ConfigFormat::Json, true) => JSON_FULL,
        (ConfigFormat::Toml, false) => TOML_MINIMAL,
        (ConfigFormat::Toml, true) => TOML_FULL,
    }
}

const YAML_MINIMAL: &str = r#"# brokerlink config

# Default connection, reported as <default>
url: "vm://0"

named:
  orders:
    url: "vm://0"
"#;

const YAML_FULL: &str = r#"# brokerlink config
#
# Fields at the top level configure the default connection, reported as
# <default>. Leave them all unset to have no default connection.

url: "vm://0"                  # Broker URL; vm://<id> is an in-process broker
# username: "admin"            # Set together with password
# password: "changeme"
# pool-size: 4                 # Max open connections for this configuration
# xa-enabled: false            # Allow transactional sends
# destination: "events"        # Defaults to the configuration name
# health-exclude: false        # Skip this configuration in health checks
# properties:                  # Transport-specific settings
#   client-id: "brokerlink"

# Health checks are on unless disabled here
# health:
#   enabled: true

# Named connections, each with the same fields as above
named:
  orders:
    url: "vm://0"
    xa-enabled: true
  # audit:
  #   url: "vm://1"
  #   destination: "audit-log"
  #   health-exclude: true
"#;

const JSON_MINIMAL: &str = r#"{
  "url": "vm://0",
  "named": {
    "orders": { "url": "vm://0" }
  }
}
"#;

const JSON_FULL: &str = r#"{
  "url": "vm://0",
  "xa-enabled": false,
  "health": {
    "enabled": true
  },
  "named": {
    "orders": {
      "url": "vm://0",
      "pool-size": 4,
      "xa-enabled": true,
      "destination": "orders"
    },
    "audit": {
      "url": "vm://1",
      "destination": "audit-log",
      "health-exclude": true,
      "properties": {
        "client-id": "brokerlink-audit"
      }
    }
  }
}
"#;

const TOML_MINIMAL: &str = r#"# brokerlink config

# Default connection, reported as <default>
url = "vm://0"

[named.orders]
url = "vm://0"
"#;

const TOML_FULL: &str = r#"# brokerlink config
#
# Keys before the first table configure the default connection,
# reported as <default>.

url = "vm://0"
# username = "admin"
# password = "changeme"
# pool-size = 4
# xa-enabled = false
# destination = "events"
# health-exclude = false

# [health]
# enabled = true

[named.orders]
url = "vm://0"
xa-enabled = true

# [named.audit]
# url = "vm://1"
# destination = "audit-log"
# health-exclude = true
#
# [named.audit.properties]
# client-id = "brokerlink-audit"
"#;
