//! # OneSource client
//!
//! Terminal client for a OneSource backend: ask a question over the
//! connected workspace tools, inspect the retrieval trace behind an answer,
//! and link or unlink providers (Slack, Google Drive, GitHub) through an
//! OAuth flow that completes in an external browser.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────────┐
//! │   CLI    │──▶│ transport │──▶│   backend    │
//! │ / shell  │   │  (JSON)   │   │ /ask /trace  │
//! └────┬─────┘   └─────┬─────┘   │ /connections │
//!      │               ▼         └──────┬───────┘
//!      │        contract/trace          │ redirects
//!      ▼        (canonical models)      ▼
//! ┌──────────┐   ┌───────────┐   ┌──────────────┐
//! │   view   │◀──│  linking  │◀──│   browser    │
//! └──────────┘   │ reconcile │   │  (launcher)  │
//!                └───────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and base-URL overrides |
//! | [`error`] | Client error taxonomy and user-facing messages |
//! | [`transport`] | JSON-over-HTTP calls against the base URL |
//! | [`contract`] | Answer, connection status and authorize payloads |
//! | [`trace`] | Trace reconciliation across the two backend shapes |
//! | [`ask`] | `POST /ask` |
//! | [`health`] | `GET /healthz` |
//! | [`latest`] | Sequence tickets so only the newest result is shown |
//! | [`linking`] | Per-provider link state machine |
//! | [`reconcile`] | Polling and manual post-OAuth reconciliation |
//! | [`launcher`] | Opening URLs in an external browser |
//! | [`connections`] | `/connections` endpoints and link flows |
//! | [`view`] | Plain-text rendering |
//! | [`app`] | Interactive shell |
//! | [`logging`] | Tracing subscriber setup |

pub mod app;
pub mod ask;
pub mod config;
pub mod connections;
pub mod contract;
pub mod error;
pub mod health;
pub mod latest;
pub mod launcher;
pub mod linking;
pub mod logging;
pub mod reconcile;
pub mod trace;
pub mod transport;
pub mod view;
