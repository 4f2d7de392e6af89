//! Backend liveness check: `GET /healthz`.

use anyhow::Result;

use crate::config::Config;
use crate::contract::Health;
use crate::error::{ClientError, ClientResult};
use crate::transport::Transport;

pub async fn fetch_health(transport: &Transport) -> ClientResult<Health> {
    let value = transport.get_json("/healthz").await?;
    serde_json::from_value(value).map_err(|e| ClientError::Decode {
        url: transport.url_for("/healthz"),
        message: e.to_string(),
    })
}

/// CLI entry point for `onesource health`. Exits non-zero unless the
/// backend reports `ok: true`.
pub async fn run_health(config: &Config) -> Result<()> {
    let transport = Transport::new(&config.backend.base_url);
    match fetch_health(&transport).await {
        Ok(Health { ok: true }) => {
            println!("ok ({})", transport.base_url());
            Ok(())
        }
        Ok(Health { ok: false }) => {
            eprintln!("Backend at {} reports not ok", transport.base_url());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {}", e.user_message());
            std::process::exit(1);
        }
    }
}
