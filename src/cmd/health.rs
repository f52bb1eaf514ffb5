//! `brokerlink health`: check the health of a running instance.
//!
//! Sends a `GET /health` request to the specified URL and displays the
//! per-configuration liveness and readiness results as formatted text
//! or raw JSON. A `503` response still carries the breakdown, so it is
//! printed before the command fails.

use http_body_util::BodyExt;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::cli::HealthArgs;
use crate::error::BrokerlinkError;
use crate::health::{ComponentHealth, HealthResponse};

pub async fn execute(args: HealthArgs) -> Result<(), BrokerlinkError> {
    let url = format!("{}/health", args.url.trim_end_matches('/'));
    let uri: hyper::Uri =
        url.parse().map_err(
            |e: hyper::http::uri::InvalidUri| BrokerlinkError::UriParse {
                source: Box::new(e),
            },
        )?;

    let connector = hyper_util::client::legacy::connect::HttpConnector::new();
    let client = Client::builder(TokioExecutor::new()).build(connector);

    let req = hyper::Request::builder()
        .uri(uri)
        .body(http_body_util::Full::new(bytes::Bytes::new()))
        .map_err(|e| BrokerlinkError::HttpRequest {
            source: Box::new(e),
        })?;

    let response = tokio::time::timeout(std::time::Duration::from_secs(10), client.request(req))
        .await
        .map_err(|_| BrokerlinkError::HttpRequest {
            source: "health check timed out after 10s".into(),
        })?
        .map_err(|e| BrokerlinkError::HttpRequest {
            source: Box::new(e),
        })?;

    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| BrokerlinkError::HttpRequest {
            source: Box::new(e),
        })?
        .to_bytes();

    if args.json {
        println!("{}", String::from_utf8_lossy(&body));
    } else {
        match serde_json::from_slice::<HealthResponse>(&body) {
            Ok(health) => print!("{}", format_report(&args.url, &health)),
            Err(e) => {
                eprintln!("Failed to parse health response: {e}");
                println!("{}", String::from_utf8_lossy(&body));
            }
        }
    }

    if !status.is_success() {
        return Err(BrokerlinkError::HealthCheckFailed(status));
    }
    Ok(())
}

fn format_report(url: &str, health: &HealthResponse) -> String {
    let mark = if health.status == "UP" { '\u{2713}' } else { '\u{2717}' };
    let mut out = format!("{mark} brokerlink is {} ({url})\n", health.status);
    section(&mut out, "liveness", &health.components.liveness);
    section(&mut out, "readiness", &health.components.readiness);
    out
}

fn section(out: &mut String, label: &str, component: &ComponentHealth) {
    out.push_str(&format!("  {label}: {}\n", component.status));
    if component.checks.is_empty() {
        out.push_str("    (no configurations checked)\n");
    }
    for (name, status) in &component.checks {
        out.push_str(&format!("    {name:<20} {status}\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_lists_each_configuration() {
        let json = r#"{
            "status": "DOWN",
            "components": {
                "liveness": { "status": "DOWN", "checks": { "<default>": "UP", "named-1": "DOWN" } },
                "readiness": { "status": "UP" }
            }
        }"#;
        let health: HealthResponse = serde_json::from_str(json).unwrap();
        let report = format_report("http://localhost:3000", &health);

        assert!(report.starts_with("\u{2717} brokerlink is DOWN"));
        assert!(report.contains("named-1"));
        assert!(report.contains("(no configurations checked)"));
    }
}
