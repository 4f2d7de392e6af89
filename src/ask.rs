//! Ask flow: `POST /ask`.
//!
//! [`submit_query`] is stateless and reentrant. Keeping only the newest
//! answer on screen is the caller's job (see [`crate::latest`]).

use anyhow::Result;
use serde_json::json;

use crate::config::Config;
use crate::contract::Answer;
use crate::error::{ClientError, ClientResult};
use crate::transport::Transport;
use crate::view;

/// Submit `text` and return the parsed answer.
///
/// Blank queries are rejected without touching the network.
pub async fn submit_query(transport: &Transport, text: &str) -> ClientResult<Answer> {
    let query = text.trim();
    if query.is_empty() {
        return Err(ClientError::EmptyQuery);
    }

    let value = transport
        .post_json("/ask", Some(json!({ "query": query })))
        .await?;
    let answer = Answer::from_value(&transport.url_for("/ask"), value)?;

    tracing::info!(
        trace_id = %answer.trace_id,
        confidence = answer.confidence,
        citations = answer.citations.len(),
        "answer received"
    );
    Ok(answer)
}

/// CLI entry point for `onesource ask`.
pub async fn run_ask(config: &Config, query: &str, as_json: bool) -> Result<()> {
    let transport = Transport::new(&config.backend.base_url);

    let answer = match submit_query(&transport, query).await {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e.user_message());
            std::process::exit(1);
        }
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
    } else {
        print!("{}", view::render_answer(&answer));
    }

    Ok(())
}
