//! `/connections` endpoints and the link / unlink flows.
//!
//! Status and authorize are fetched as JSON. Install and disconnect are
//! browser navigations: the backend answers them with redirects, so the
//! client only builds the absolute URL and hands it to a [`Launcher`].

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::contract::{AuthorizeResponse, ConnectionStatus, Provider};
use crate::error::ClientResult;
use crate::launcher::{build_launcher, Launcher};
use crate::linking::Linker;
use crate::reconcile::{
    build_reconciler, ManualReconciler, PollReport, ReconcileOutcome, Reconciler, StatusSource,
};
use crate::transport::Transport;
use crate::view;

pub async fn fetch_status(transport: &Transport) -> ClientResult<ConnectionStatus> {
    let value = transport.get_json("/connections").await?;
    ConnectionStatus::from_value(&transport.url_for("/connections"), value)
}

pub async fn authorize(transport: &Transport, provider: Provider) -> ClientResult<AuthorizeResponse> {
    let path = format!("/connections/{}/authorize", provider);
    let value = transport.post_json(&path, None).await?;
    AuthorizeResponse::from_value(&transport.url_for(&path), value)
}

pub fn install_url(transport: &Transport, provider: Provider) -> String {
    transport.url_for(&format!("/connections/{}/install", provider))
}

pub fn disconnect_url(transport: &Transport, provider: Provider) -> String {
    transport.url_for(&format!("/connections/{}/disconnect", provider))
}

#[async_trait]
impl StatusSource for Transport {
    async fn fetch_status(&self) -> ClientResult<ConnectionStatus> {
        fetch_status(self).await
    }
}

/// Request an authorize URL and open it.
///
/// On any failure the linker is untouched; on success the provider enters
/// `AuthorizingExternally` and the new attempt id is returned.
pub async fn start_authorization(
    transport: &Transport,
    launcher: &dyn Launcher,
    linker: &mut Linker,
    provider: Provider,
) -> ClientResult<uuid::Uuid> {
    let response = authorize(transport, provider).await?;
    launcher.open(&response.authorize_url)?;
    let (attempt, _) = linker.begin_authorization(provider, Utc::now());
    Ok(attempt.id)
}

/// CLI entry point for `onesource connections`.
pub async fn run_connections(config: &Config, as_json: bool) -> Result<()> {
    let transport = Transport::new(&config.backend.base_url);
    let status = match fetch_status(&transport).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e.user_message());
            std::process::exit(1);
        }
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        let mut linker = Linker::new();
        linker.apply_status(&status);
        print!("{}", view::render_connections(&linker));
    }
    Ok(())
}

/// CLI entry point for `onesource connect <provider>`.
pub async fn run_connect(config: &Config, provider: Provider, manual: bool) -> Result<()> {
    let transport = Transport::new(&config.backend.base_url);
    let launcher = build_launcher(&config.browser);
    let mut linker = Linker::new();

    match fetch_status(&transport).await {
        Ok(status) => {
            linker.apply_status(&status);
        }
        Err(e) => {
            eprintln!("Error: {}", e.user_message());
            std::process::exit(1);
        }
    }

    if linker.state(provider).is_connected() {
        println!("{} is already connected.", provider.display_name());
        return Ok(());
    }

    let attempt = match start_authorization(&transport, launcher.as_ref(), &mut linker, provider).await
    {
        Ok(id) => id,
        Err(e) => {
            eprintln!("Error: {}", e.user_message());
            std::process::exit(1);
        }
    };
    println!(
        "Authorize {} in the browser window that just opened.",
        provider.display_name()
    );

    let reconciler: Box<dyn Reconciler> = if manual {
        Box::new(ManualReconciler)
    } else {
        build_reconciler(&config.linking)
    };

    if reconciler.is_manual() {
        reconcile_manually(&transport, &mut linker, provider).await?;
    } else {
        reconcile_by_polling(&transport, reconciler.as_ref(), &mut linker, provider, attempt)
            .await;
    }

    print!("{}", view::render_connections(&linker));
    Ok(())
}

async fn reconcile_by_polling(
    transport: &Transport,
    reconciler: &dyn Reconciler,
    linker: &mut Linker,
    provider: Provider,
    attempt: uuid::Uuid,
) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let poll = reconciler.run(provider, attempt, transport, cancel.clone(), tx);
    tokio::pin!(poll);

    let outcome = loop {
        tokio::select! {
            outcome = &mut poll => break outcome,
            Some(report) = rx.recv() => apply_report(linker, report),
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                linker.abandon(provider);
                break ReconcileOutcome::Cancelled;
            }
        }
    };

    // Reports sent right before the poll future finished.
    while let Ok(report) = rx.try_recv() {
        if outcome != ReconcileOutcome::Cancelled {
            apply_report(linker, report);
        }
    }

    match outcome {
        ReconcileOutcome::Connected => println!("{} connected.", provider.display_name()),
        ReconcileOutcome::Exhausted => println!(
            "Stopped waiting for {}. Run `onesource connections` once you finish in the browser.",
            provider.display_name()
        ),
        ReconcileOutcome::Cancelled => println!("Cancelled."),
        ReconcileOutcome::Deferred => {}
    }
}

fn apply_report(linker: &mut Linker, report: PollReport) {
    match report {
        PollReport::Status {
            provider,
            attempt,
            status,
            ..
        } => {
            linker.apply_poll(provider, attempt, &status);
        }
        PollReport::Failed { error, tick, .. } => {
            eprintln!("  check {} failed: {}", tick, error.user_message());
        }
        PollReport::Exhausted { provider, attempt } => {
            linker.poll_exhausted(provider, attempt);
        }
    }
}

async fn reconcile_manually(
    transport: &Transport,
    linker: &mut Linker,
    provider: Provider,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        println!("Press Enter to refresh once done, or type q to stop waiting.");
        let line = match lines.next_line().await? {
            Some(l) => l,
            None => {
                linker.abandon(provider);
                return Ok(());
            }
        };
        if line.trim().eq_ignore_ascii_case("q") {
            linker.abandon(provider);
            return Ok(());
        }
        match fetch_status(transport).await {
            Ok(status) => {
                linker.apply_status(&status);
                if linker.state(provider).is_connected() {
                    println!("{} connected.", provider.display_name());
                    return Ok(());
                }
                println!("{} is not connected yet.", provider.display_name());
            }
            Err(e) => eprintln!("Error: {}", e.user_message()),
        }
    }
}

/// CLI entry point for `onesource disconnect <provider>`.
pub async fn run_disconnect(config: &Config, provider: Provider) -> Result<()> {
    let transport = Transport::new(&config.backend.base_url);
    let launcher = build_launcher(&config.browser);

    if let Err(e) = launcher.open(&disconnect_url(&transport, provider)) {
        eprintln!("Error: {}", e.user_message());
        std::process::exit(1);
    }
    println!("Disconnect of {} opened in the browser.", provider.display_name());
    Ok(())
}

/// CLI entry point for `onesource install <provider>`.
pub async fn run_install(config: &Config, provider: Provider) -> Result<()> {
    let transport = Transport::new(&config.backend.base_url);
    let launcher = build_launcher(&config.browser);

    if let Err(e) = launcher.open(&install_url(&transport, provider)) {
        eprintln!("Error: {}", e.user_message());
        std::process::exit(1);
    }
    Ok(())
}
