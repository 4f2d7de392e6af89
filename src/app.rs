//! Interactive shell: a message/update loop with a single state writer.
//!
//! [`App::update`] is the only place application state changes. It never
//! awaits; anything that needs the network is returned as an [`Effect`],
//! run on a spawned task, and fed back as a [`Message`]. Each effect is
//! tagged (ticket or attempt id) so completions that arrive late, out of
//! order, or after their view was closed are dropped on the floor.

use anyhow::Result;
use chrono::Utc;
use std::collections::BTreeMap;
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ask::submit_query;
use crate::config::Config;
use crate::connections::{authorize, disconnect_url, fetch_status, install_url};
use crate::contract::{Answer, AuthorizeResponse, ConnectionStatus, Provider};
use crate::error::{ClientError, ClientResult};
use crate::latest::{LatestSlot, Ticket};
use crate::launcher::{build_launcher, Launcher};
use crate::linking::{LinkState, Linker};
use crate::reconcile::{build_reconciler, PollReport, ReconcileOutcome, Reconciler};
use crate::trace::{fetch_trace, Trace};
use crate::transport::Transport;
use crate::view;

/// A parsed shell line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ask(String),
    Trace(Option<String>),
    Close,
    Refresh,
    Connect(Provider),
    Stop(Provider),
    Disconnect(Provider),
    Install(Provider),
    Help,
    Quit,
    Invalid(String),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((v, r)) => (v, r.trim()),
        None => (line, ""),
    };

    let provider = |rest: &str, make: fn(Provider) -> Command| match rest.parse::<Provider>() {
        Ok(p) => make(p),
        Err(e) => Command::Invalid(e.user_message()),
    };

    match verb.to_ascii_lowercase().as_str() {
        "ask" => Command::Ask(rest.to_string()),
        "trace" if rest.is_empty() => Command::Trace(None),
        "trace" => Command::Trace(Some(rest.to_string())),
        "close" => Command::Close,
        "status" | "refresh" => Command::Refresh,
        "connect" => provider(rest, Command::Connect),
        "stop" => provider(rest, Command::Stop),
        "disconnect" => provider(rest, Command::Disconnect),
        "install" => provider(rest, Command::Install),
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        "" => Command::Invalid(String::new()),
        // Bare text is a question.
        _ => Command::Ask(line.to_string()),
    }
}

#[derive(Debug)]
pub enum Message {
    Input(String),
    AskCompleted {
        ticket: Ticket,
        result: ClientResult<Answer>,
    },
    TraceLoaded {
        ticket: Ticket,
        result: ClientResult<Trace>,
    },
    StatusLoaded {
        ticket: Ticket,
        result: ClientResult<ConnectionStatus>,
    },
    AuthorizeLoaded {
        provider: Provider,
        ticket: Ticket,
        result: ClientResult<AuthorizeResponse>,
    },
    Poll(PollReport),
    PollFinished {
        provider: Provider,
        attempt: Uuid,
        outcome: ReconcileOutcome,
    },
}

#[derive(Debug)]
pub enum Effect {
    Ask {
        ticket: Ticket,
        query: String,
    },
    FetchTrace {
        ticket: Ticket,
        id: String,
        cancel: CancellationToken,
    },
    FetchStatus {
        ticket: Ticket,
    },
    Authorize {
        provider: Provider,
        ticket: Ticket,
    },
    StartPolling {
        provider: Provider,
        attempt: Uuid,
        cancel: CancellationToken,
    },
    Print(String),
    Quit,
}

pub struct App {
    transport: Arc<Transport>,
    launcher: Box<dyn Launcher>,
    manual: bool,
    answer: LatestSlot<Answer>,
    ask_error: Option<String>,
    trace: LatestSlot<Trace>,
    trace_cancel: Option<CancellationToken>,
    status: LatestSlot<ConnectionStatus>,
    linker: Linker,
    authorize_tickets: LatestSlot<()>,
    /// Newest in-flight authorize request per provider.
    authorizing: BTreeMap<Provider, Ticket>,
    polls: BTreeMap<Provider, (Uuid, CancellationToken)>,
}

impl App {
    pub fn new(transport: Arc<Transport>, launcher: Box<dyn Launcher>, manual: bool) -> Self {
        Self {
            transport,
            launcher,
            manual,
            answer: LatestSlot::new(),
            ask_error: None,
            trace: LatestSlot::new(),
            trace_cancel: None,
            status: LatestSlot::new(),
            linker: Linker::new(),
            authorize_tickets: LatestSlot::new(),
            authorizing: BTreeMap::new(),
            polls: BTreeMap::new(),
        }
    }

    /// Effects to run on startup: the first status fetch.
    pub fn init(&mut self) -> Vec<Effect> {
        vec![Effect::FetchStatus {
            ticket: self.status.issue(),
        }]
    }

    pub fn answer(&self) -> Option<&Answer> {
        self.answer.get()
    }

    pub fn ask_error(&self) -> Option<&str> {
        self.ask_error.as_deref()
    }

    pub fn trace(&self) -> Option<&Trace> {
        self.trace.get()
    }

    pub fn linker(&self) -> &Linker {
        &self.linker
    }

    pub fn is_polling(&self, provider: Provider) -> bool {
        self.polls.contains_key(&provider)
    }

    pub fn update(&mut self, message: Message) -> Vec<Effect> {
        match message {
            Message::Input(line) => self.handle_command(parse_command(&line)),

            Message::AskCompleted { ticket, result } => {
                let (value, error) = match result {
                    Ok(answer) => (Some(answer), None),
                    Err(e) => (None, Some(e)),
                };
                if !self.answer.resolve(ticket, value) {
                    tracing::warn!(seq = ticket.seq(), "discarding stale answer");
                    return Vec::new();
                }
                match error {
                    Some(e) => {
                        self.ask_error = Some(e.user_message());
                        vec![Effect::Print(view::render_error(&e))]
                    }
                    None => {
                        self.ask_error = None;
                        self.answer
                            .get()
                            .map(|a| vec![Effect::Print(view::render_answer(a))])
                            .unwrap_or_default()
                    }
                }
            }

            Message::TraceLoaded { ticket, result } => match result {
                Ok(trace) => {
                    if !self.trace.resolve(ticket, Some(trace)) {
                        tracing::warn!(seq = ticket.seq(), "discarding stale trace");
                        return Vec::new();
                    }
                    self.trace_cancel = None;
                    self.trace
                        .get()
                        .map(|t| vec![Effect::Print(view::render_trace(t))])
                        .unwrap_or_default()
                }
                Err(e) => {
                    if !self.trace.resolve(ticket, None) {
                        return Vec::new();
                    }
                    self.trace_cancel = None;
                    vec![Effect::Print(view::render_error(&e))]
                }
            },

            Message::StatusLoaded { ticket, result } => match result {
                Ok(status) => {
                    if !self.status.resolve(ticket, Some(status)) {
                        tracing::warn!(seq = ticket.seq(), "discarding stale status");
                        return Vec::new();
                    }
                    let transitions = match self.status.get() {
                        Some(status) => self.linker.apply_status(status),
                        None => Vec::new(),
                    };
                    for t in transitions.iter().filter(|t| t.to == "connected") {
                        self.stop_polling(t.provider);
                    }
                    vec![Effect::Print(view::render_connections(&self.linker))]
                }
                Err(e) => {
                    if !self.status.is_current(ticket) {
                        return Vec::new();
                    }
                    vec![Effect::Print(view::render_error(&e))]
                }
            },

            Message::AuthorizeLoaded {
                provider,
                ticket,
                result,
            } => {
                if self.authorizing.get(&provider) != Some(&ticket) {
                    tracing::warn!(%provider, seq = ticket.seq(), "discarding stale authorize response");
                    return Vec::new();
                }
                self.authorizing.remove(&provider);
                let response = match result {
                    Ok(r) => r,
                    Err(e) => return vec![Effect::Print(view::render_error(&e))],
                };
                if let Err(e) = self.launcher.open(&response.authorize_url) {
                    return vec![Effect::Print(view::render_error(&e))];
                }

                self.stop_polling(provider);
                let (attempt, transition) =
                    self.linker.begin_authorization(provider, Utc::now());
                let mut effects = vec![Effect::Print(view::render_transition(&transition))];

                if self.manual {
                    effects.push(Effect::Print(
                        "Finish in the browser, then type `refresh`.\n".to_string(),
                    ));
                } else {
                    let cancel = CancellationToken::new();
                    self.polls.insert(provider, (attempt.id, cancel.clone()));
                    effects.push(Effect::StartPolling {
                        provider,
                        attempt: attempt.id,
                        cancel,
                    });
                }
                effects
            }

            Message::Poll(report) => match report {
                PollReport::Status {
                    provider,
                    attempt,
                    status,
                    ..
                } => match self.linker.apply_poll(provider, attempt, &status) {
                    Some(t) => vec![Effect::Print(view::render_transition(&t))],
                    None => Vec::new(),
                },
                PollReport::Failed {
                    provider,
                    attempt,
                    error,
                    ..
                } => {
                    if self.linker.is_current_attempt(provider, attempt) {
                        vec![Effect::Print(view::render_error(&error))]
                    } else {
                        Vec::new()
                    }
                }
                PollReport::Exhausted { provider, attempt } => {
                    match self.linker.poll_exhausted(provider, attempt) {
                        Some(t) => vec![Effect::Print(format!(
                            "{}Stopped waiting. Type `refresh` once you finish in the browser.\n",
                            view::render_transition(&t)
                        ))],
                        None => Vec::new(),
                    }
                }
            },

            Message::PollFinished {
                provider,
                attempt,
                outcome,
            } => {
                tracing::debug!(%provider, %attempt, ?outcome, "polling finished");
                if self.polls.get(&provider).map(|(id, _)| *id) == Some(attempt) {
                    self.polls.remove(&provider);
                }
                Vec::new()
            }
        }
    }

    fn handle_command(&mut self, command: Command) -> Vec<Effect> {
        match command {
            Command::Ask(query) => {
                if query.trim().is_empty() {
                    return vec![Effect::Print(view::render_error(&ClientError::EmptyQuery))];
                }
                vec![Effect::Ask {
                    ticket: self.answer.issue(),
                    query,
                }]
            }
            Command::Trace(id) => {
                let id = match id.or_else(|| self.answer.get().map(|a| a.trace_id.clone())) {
                    Some(id) => id,
                    None => return vec![Effect::Print("No answer yet; give a trace id.\n".into())],
                };
                self.close_trace();
                let cancel = CancellationToken::new();
                self.trace_cancel = Some(cancel.clone());
                vec![Effect::FetchTrace {
                    ticket: self.trace.issue(),
                    id,
                    cancel,
                }]
            }
            Command::Close => {
                self.close_trace();
                Vec::new()
            }
            Command::Refresh => vec![Effect::FetchStatus {
                ticket: self.status.issue(),
            }],
            Command::Connect(provider) => {
                if self.linker.state(provider).is_connected() {
                    return vec![Effect::Print(format!(
                        "{} is already connected.\n",
                        provider.display_name()
                    ))];
                }
                let ticket = self.authorize_tickets.issue();
                self.authorizing.insert(provider, ticket);
                vec![Effect::Authorize { provider, ticket }]
            }
            Command::Stop(provider) => {
                self.authorizing.remove(&provider);
                self.stop_polling(provider);
                match self.linker.abandon(provider) {
                    Some(t) => vec![Effect::Print(view::render_transition(&t))],
                    None => Vec::new(),
                }
            }
            Command::Disconnect(provider) => {
                let url = disconnect_url(&self.transport, provider);
                if let Err(e) = self.launcher.open(&url) {
                    return vec![Effect::Print(view::render_error(&e))];
                }
                self.authorizing.remove(&provider);
                self.stop_polling(provider);
                match self.linker.mark_disconnected(provider) {
                    Some(t) => vec![Effect::Print(view::render_transition(&t))],
                    None => Vec::new(),
                }
            }
            Command::Install(provider) => {
                match self.launcher.open(&install_url(&self.transport, provider)) {
                    Ok(()) => Vec::new(),
                    Err(e) => vec![Effect::Print(view::render_error(&e))],
                }
            }
            Command::Help => vec![Effect::Print(view::render_help())],
            Command::Quit => {
                self.shutdown();
                vec![Effect::Quit]
            }
            Command::Invalid(msg) if msg.is_empty() => Vec::new(),
            Command::Invalid(msg) => vec![Effect::Print(format!("{}\n", msg))],
        }
    }

    fn close_trace(&mut self) {
        if let Some(cancel) = self.trace_cancel.take() {
            cancel.cancel();
        }
        self.trace.close();
    }

    fn stop_polling(&mut self, provider: Provider) {
        if let Some((attempt, cancel)) = self.polls.remove(&provider) {
            tracing::debug!(%provider, %attempt, "cancelling poll");
            cancel.cancel();
        }
    }

    /// Cancel every outstanding fetch and poll.
    pub fn shutdown(&mut self) {
        self.close_trace();
        self.authorizing.clear();
        for provider in Provider::ALL {
            self.stop_polling(provider);
        }
        self.answer.close();
        self.status.close();
    }

    /// One-line prompt summary of pending authorizations.
    pub fn prompt(&self) -> String {
        let waiting: Vec<&str> = self
            .linker
            .states()
            .filter(|(_, s)| matches!(s, LinkState::AuthorizingExternally(_)))
            .map(|(p, _)| p.as_str())
            .collect();
        if waiting.is_empty() {
            "> ".to_string()
        } else {
            format!("[waiting: {}] > ", waiting.join(","))
        }
    }
}

/// CLI entry point for `onesource shell`.
pub async fn run_shell(config: &Config) -> Result<()> {
    let transport = Arc::new(Transport::new(&config.backend.base_url));
    let reconciler: Arc<dyn Reconciler> = Arc::from(build_reconciler(&config.linking));
    let mut app = App::new(
        transport.clone(),
        build_launcher(&config.browser),
        reconciler.is_manual(),
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Detached so a pending read never holds the runtime open after `quit`.
    let input = tx.clone();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if input.send(Message::Input(line)).is_err() {
                return;
            }
        }
        let _ = input.send(Message::Input("quit".to_string()));
    });

    println!("Connected to {}. Type `help` for commands.", transport.base_url());
    let initial = app.init();
    for effect in initial {
        spawn_effect(effect, &transport, &reconciler, &tx);
    }

    while let Some(message) = rx.recv().await {
        for effect in app.update(message) {
            match effect {
                Effect::Print(text) => print!("{}", text),
                Effect::Quit => return Ok(()),
                other => spawn_effect(other, &transport, &reconciler, &tx),
            }
        }
    }

    app.shutdown();
    Ok(())
}

fn spawn_effect(
    effect: Effect,
    transport: &Arc<Transport>,
    reconciler: &Arc<dyn Reconciler>,
    tx: &mpsc::UnboundedSender<Message>,
) {
    let transport = transport.clone();
    let tx = tx.clone();

    match effect {
        Effect::Ask { ticket, query } => {
            tokio::spawn(async move {
                let result = submit_query(&transport, &query).await;
                let _ = tx.send(Message::AskCompleted { ticket, result });
            });
        }
        Effect::FetchTrace { ticket, id, cancel } => {
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    result = fetch_trace(&transport, &id) => {
                        let _ = tx.send(Message::TraceLoaded { ticket, result });
                    }
                }
            });
        }
        Effect::FetchStatus { ticket } => {
            tokio::spawn(async move {
                let result = fetch_status(&transport).await;
                let _ = tx.send(Message::StatusLoaded { ticket, result });
            });
        }
        Effect::Authorize { provider, ticket } => {
            tokio::spawn(async move {
                let result = authorize(&transport, provider).await;
                let _ = tx.send(Message::AuthorizeLoaded {
                    provider,
                    ticket,
                    result,
                });
            });
        }
        Effect::StartPolling {
            provider,
            attempt,
            cancel,
        } => {
            let reconciler = reconciler.clone();
            tokio::spawn(async move {
                let (ptx, mut prx) = mpsc::unbounded_channel();
                let run = reconciler.run(provider, attempt, transport.as_ref(), cancel, ptx);
                tokio::pin!(run);
                let outcome = loop {
                    tokio::select! {
                        outcome = &mut run => break outcome,
                        Some(report) = prx.recv() => {
                            let _ = tx.send(Message::Poll(report));
                        }
                    }
                };
                while let Ok(report) = prx.try_recv() {
                    let _ = tx.send(Message::Poll(report));
                }
                let _ = tx.send(Message::PollFinished {
                    provider,
                    attempt,
                    outcome,
                });
            });
        }
        Effect::Print(text) => print!("{}", text),
        Effect::Quit => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{Citation, ProviderConnection};
    use std::sync::Mutex;

    struct RecordingLauncher {
        opened: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Launcher for RecordingLauncher {
        fn open(&self, url: &str) -> ClientResult<()> {
            if self.fail {
                return Err(ClientError::Launch {
                    url: url.to_string(),
                    message: "blocked".to_string(),
                });
            }
            self.opened.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    fn app_with(fail: bool, manual: bool) -> (App, Arc<Mutex<Vec<String>>>) {
        let opened = Arc::new(Mutex::new(Vec::new()));
        let launcher = RecordingLauncher {
            opened: opened.clone(),
            fail,
        };
        let transport = Arc::new(Transport::new("http://backend.test/"));
        (App::new(transport, Box::new(launcher), manual), opened)
    }

    fn answer(text: &str, trace_id: &str) -> Answer {
        Answer {
            text: text.to_string(),
            citations: vec![Citation {
                label: "Runbook".into(),
                url: "https://x/runbook".into(),
            }],
            freshness: Utc::now(),
            confidence: 0.5,
            trace_id: trace_id.to_string(),
            policy_banner: None,
        }
    }

    fn status(slack: bool) -> ConnectionStatus {
        let mut s = ConnectionStatus::all_disconnected();
        s.providers.insert(
            Provider::Slack,
            ProviderConnection {
                connected: slack,
                workspace: None,
            },
        );
        s
    }

    fn load_status(app: &mut App, status: ConnectionStatus) {
        let ticket = app.status.issue();
        app.update(Message::StatusLoaded {
            ticket,
            result: Ok(status),
        });
    }

    fn ask_ticket(effects: &[Effect]) -> Ticket {
        match effects.first() {
            Some(Effect::Ask { ticket, .. }) => *ticket,
            other => panic!("expected ask effect, got {:?}", other),
        }
    }

    fn printed(effects: &[Effect]) -> String {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Print(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    fn request_authorize(app: &mut App, provider: Provider) -> Ticket {
        let effects = app.update(Message::Input(format!("connect {}", provider)));
        match effects.first() {
            Some(Effect::Authorize { provider: p, ticket }) if *p == provider => *ticket,
            other => panic!("expected authorize effect, got {:?}", other),
        }
    }

    fn connect_slack(app: &mut App) -> (Uuid, CancellationToken) {
        load_status(app, status(false));
        let ticket = request_authorize(app, Provider::Slack);
        let effects = app.update(Message::AuthorizeLoaded {
            provider: Provider::Slack,
            ticket,
            result: Ok(AuthorizeResponse {
                authorize_url: "https://slack.com/oauth/v2/authorize?state=s".into(),
                state: Some("s".into()),
            }),
        });
        effects
            .into_iter()
            .find_map(|e| match e {
                Effect::StartPolling {
                    attempt, cancel, ..
                } => Some((attempt, cancel)),
                _ => None,
            })
            .expect("polling started")
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("ask  hi there "), Command::Ask("hi there".into()));
        assert_eq!(parse_command("trace"), Command::Trace(None));
        assert_eq!(parse_command("trace t1"), Command::Trace(Some("t1".into())));
        assert_eq!(parse_command("connect GitHub"), Command::Connect(Provider::Github));
        assert!(matches!(parse_command("connect dropbox"), Command::Invalid(_)));
        assert_eq!(
            parse_command("how do I deploy?"),
            Command::Ask("how do I deploy?".into())
        );
        assert_eq!(parse_command("refresh"), Command::Refresh);
    }

    #[test]
    fn test_slow_older_answer_does_not_overwrite_newer() {
        let (mut app, _) = app_with(false, false);
        let a = ask_ticket(&app.update(Message::Input("ask slow".into())));
        let b = ask_ticket(&app.update(Message::Input("ask fast".into())));

        app.update(Message::AskCompleted {
            ticket: b,
            result: Ok(answer("B", "tb")),
        });
        let effects = app.update(Message::AskCompleted {
            ticket: a,
            result: Ok(answer("A", "ta")),
        });

        assert!(effects.is_empty());
        assert_eq!(app.answer().unwrap().text, "B");
    }

    #[test]
    fn test_error_replaces_previous_answer() {
        let (mut app, _) = app_with(false, false);
        let first = ask_ticket(&app.update(Message::Input("ask one".into())));
        app.update(Message::AskCompleted {
            ticket: first,
            result: Ok(answer("A", "ta")),
        });

        let second = ask_ticket(&app.update(Message::Input("ask two".into())));
        let effects = app.update(Message::AskCompleted {
            ticket: second,
            result: Err(ClientError::Http {
                url: "http://backend.test/ask".into(),
                status: 500,
                body: "internal error".into(),
            }),
        });

        assert!(app.answer().is_none());
        assert!(printed(&effects).contains("500"));
        assert!(app.ask_error().unwrap().contains("500"));
    }

    #[test]
    fn test_blank_ask_issues_nothing() {
        let (mut app, _) = app_with(false, false);
        let effects = app.update(Message::Input("ask   ".into()));
        assert_eq!(effects.len(), 1);
        assert!(matches!(effects[0], Effect::Print(_)));
    }

    #[test]
    fn test_closed_trace_ignores_late_completion() {
        let (mut app, _) = app_with(false, false);
        let effects = app.update(Message::Input("trace t1".into()));
        let (ticket, cancel) = match &effects[0] {
            Effect::FetchTrace { ticket, cancel, .. } => (*ticket, cancel.clone()),
            other => panic!("unexpected {:?}", other),
        };

        app.update(Message::Input("close".into()));
        assert!(cancel.is_cancelled());

        let trace = crate::trace::reconcile_trace(&serde_json::json!({
            "trace_id": "t1", "query": "q", "chosen": {"url": "u"}
        }))
        .unwrap();
        let effects = app.update(Message::TraceLoaded {
            ticket,
            result: Ok(trace),
        });
        assert!(effects.is_empty());
        assert!(app.trace().is_none());
    }

    #[test]
    fn test_trace_defaults_to_last_answer() {
        let (mut app, _) = app_with(false, false);
        let t = ask_ticket(&app.update(Message::Input("ask q".into())));
        app.update(Message::AskCompleted {
            ticket: t,
            result: Ok(answer("A", "t9")),
        });
        let effects = app.update(Message::Input("trace".into()));
        assert!(matches!(&effects[0], Effect::FetchTrace { id, .. } if id == "t9"));
    }

    #[test]
    fn test_connect_polls_until_connected() {
        let (mut app, opened) = app_with(false, false);
        let (attempt, _cancel) = connect_slack(&mut app);
        assert_eq!(opened.lock().unwrap().len(), 1);
        assert_eq!(app.linker().state(Provider::Slack).label(), "authorizing");
        assert!(app.is_polling(Provider::Slack));
        assert!(app.prompt().contains("slack"));

        app.update(Message::Poll(PollReport::Status {
            provider: Provider::Slack,
            attempt,
            tick: 1,
            status: status(true),
        }));
        assert!(app.linker().state(Provider::Slack).is_connected());
    }

    #[test]
    fn test_stop_prevents_late_poll_mutation() {
        let (mut app, _) = app_with(false, false);
        let (attempt, cancel) = connect_slack(&mut app);

        app.update(Message::Input("stop slack".into()));
        assert!(cancel.is_cancelled());
        assert!(!app.is_polling(Provider::Slack));

        let effects = app.update(Message::Poll(PollReport::Status {
            provider: Provider::Slack,
            attempt,
            tick: 2,
            status: status(true),
        }));
        assert!(effects.is_empty());
        assert_eq!(app.linker().state(Provider::Slack).label(), "disconnected");
    }

    #[test]
    fn test_reconnect_supersedes_previous_attempt() {
        let (mut app, _) = app_with(false, false);
        let (first, first_cancel) = connect_slack(&mut app);
        let (second, _) = connect_slack(&mut app);
        assert!(first_cancel.is_cancelled());
        assert_ne!(first, second);

        app.update(Message::Poll(PollReport::Exhausted {
            provider: Provider::Slack,
            attempt: first,
        }));
        assert_eq!(app.linker().state(Provider::Slack).label(), "authorizing");
    }

    #[test]
    fn test_stop_drops_in_flight_authorize() {
        let (mut app, opened) = app_with(false, false);
        load_status(&mut app, status(false));
        let ticket = request_authorize(&mut app, Provider::Slack);
        app.update(Message::Input("stop slack".into()));

        let effects = app.update(Message::AuthorizeLoaded {
            provider: Provider::Slack,
            ticket,
            result: Ok(AuthorizeResponse {
                authorize_url: "https://slack/oauth".into(),
                state: None,
            }),
        });
        assert!(effects.is_empty());
        assert!(opened.lock().unwrap().is_empty());
        assert_eq!(app.linker().state(Provider::Slack).label(), "disconnected");
        assert!(!app.is_polling(Provider::Slack));
    }

    #[test]
    fn test_only_newest_authorize_response_is_used() {
        let (mut app, opened) = app_with(false, false);
        load_status(&mut app, status(false));
        let first = request_authorize(&mut app, Provider::Drive);
        let second = request_authorize(&mut app, Provider::Drive);
        let response = |url: &str| {
            Ok(AuthorizeResponse {
                authorize_url: url.into(),
                state: None,
            })
        };

        app.update(Message::AuthorizeLoaded {
            provider: Provider::Drive,
            ticket: first,
            result: response("https://drive/old"),
        });
        assert!(opened.lock().unwrap().is_empty());

        app.update(Message::AuthorizeLoaded {
            provider: Provider::Drive,
            ticket: second,
            result: response("https://drive/new"),
        });
        assert_eq!(opened.lock().unwrap().as_slice(), ["https://drive/new".to_string()]);
        assert_eq!(app.linker().state(Provider::Drive).label(), "authorizing");
    }

    #[test]
    fn test_quit_drops_in_flight_authorize() {
        let (mut app, opened) = app_with(false, false);
        load_status(&mut app, status(false));
        let ticket = request_authorize(&mut app, Provider::Github);
        app.update(Message::Input("quit".into()));
        let effects = app.update(Message::AuthorizeLoaded {
            provider: Provider::Github,
            ticket,
            result: Ok(AuthorizeResponse {
                authorize_url: "https://github/oauth".into(),
                state: None,
            }),
        });
        assert!(effects.is_empty());
        assert!(opened.lock().unwrap().is_empty());
    }

    #[test]
    fn test_launch_failure_keeps_prior_state() {
        let (mut app, _) = app_with(true, false);
        load_status(&mut app, status(false));
        let ticket = request_authorize(&mut app, Provider::Slack);
        let effects = app.update(Message::AuthorizeLoaded {
            provider: Provider::Slack,
            ticket,
            result: Ok(AuthorizeResponse {
                authorize_url: "https://slack.com/oauth".into(),
                state: None,
            }),
        });
        assert_eq!(app.linker().state(Provider::Slack).label(), "disconnected");
        assert!(printed(&effects).contains("Browser window"));
        assert!(!app.is_polling(Provider::Slack));
    }

    #[test]
    fn test_authorize_error_keeps_prior_state() {
        let (mut app, opened) = app_with(false, false);
        load_status(&mut app, status(false));
        let ticket = request_authorize(&mut app, Provider::Github);
        let effects = app.update(Message::AuthorizeLoaded {
            provider: Provider::Github,
            ticket,
            result: Err(ClientError::Http {
                url: "u".into(),
                status: 500,
                body: "GitHub OAuth not configured".into(),
            }),
        });
        assert!(printed(&effects).contains("HTTP 500"));
        assert!(opened.lock().unwrap().is_empty());
        assert_eq!(app.linker().state(Provider::Github).label(), "disconnected");
    }

    #[test]
    fn test_manual_strategy_waits_for_refresh() {
        let (mut app, _) = app_with(false, true);
        load_status(&mut app, status(false));
        let ticket = request_authorize(&mut app, Provider::Slack);
        let effects = app.update(Message::AuthorizeLoaded {
            provider: Provider::Slack,
            ticket,
            result: Ok(AuthorizeResponse {
                authorize_url: "https://slack.com/oauth".into(),
                state: None,
            }),
        });
        assert!(!effects.iter().any(|e| matches!(e, Effect::StartPolling { .. })));
        assert!(printed(&effects).contains("refresh"));

        let effects = app.update(Message::Input("refresh".into()));
        let ticket = match effects[0] {
            Effect::FetchStatus { ticket } => ticket,
            ref other => panic!("unexpected {:?}", other),
        };
        app.update(Message::StatusLoaded {
            ticket,
            result: Ok(status(true)),
        });
        assert!(app.linker().state(Provider::Slack).is_connected());
        assert_eq!(
            app.linker().outcome(Provider::Slack).unwrap().state,
            crate::linking::AttemptState::Completed
        );
    }

    #[test]
    fn test_disconnect_opens_url_and_transitions() {
        let (mut app, opened) = app_with(false, false);
        load_status(&mut app, status(true));
        app.update(Message::Input("disconnect slack".into()));
        assert_eq!(
            opened.lock().unwrap()[0],
            "http://backend.test/connections/slack/disconnect"
        );
        assert_eq!(app.linker().state(Provider::Slack).label(), "disconnected");
    }

    #[test]
    fn test_quit_cancels_everything() {
        let (mut app, _) = app_with(false, false);
        let (_, cancel) = connect_slack(&mut app);
        let effects = app.update(Message::Input("quit".into()));
        assert!(matches!(effects.last(), Some(Effect::Quit)));
        assert!(cancel.is_cancelled());
    }
}
