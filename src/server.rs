//! Server state and TCP/TLS listeners.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;

use crate::chanlog::ChannelLog;
use crate::config::ServerConfig;
use crate::connection;
use crate::irc::{self, clamp_line};
use crate::state::{ChannelRecord, StateStore};

/// State for a single channel. The member set holds session IDs; a channel
/// with no members is removed from the registry.
#[derive(Debug, Default)]
pub struct ChannelState {
    /// Name in the case the creating client supplied, for display.
    pub name: String,
    pub topic: String,
    /// Channel key (+k). Joining requires the matching key when set.
    pub key: Option<String>,
    pub members: HashSet<String>,
}

impl ChannelState {
    pub fn new(name: String, record: ChannelRecord) -> Self {
        Self {
            name,
            topic: record.topic,
            key: record.key,
            members: HashSet::new(),
        }
    }
}

/// Per-session identity visible to other connections (WHO, WHOIS, NAMES,
/// WALLOPS). The owning connection task keeps its own working copy and
/// mirrors changes here.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub nick: Option<String>,
    pub user: Option<String>,
    pub realname: Option<String>,
    /// Host shown in prefixes; the configured cloak when one is set.
    pub host: String,
}

impl ClientInfo {
    pub fn new(host: String) -> Self {
        Self {
            nick: None,
            user: None,
            realname: None,
            host,
        }
    }
}

/// Shared state accessible by all connection handlers.
///
/// Lock order when more than one map is needed: channels, then sessions or
/// nick index, then connections. Locks are never held across an await.
pub struct SharedState {
    pub server_name: String,
    pub config: ServerConfig,
    /// session_id -> sender for queuing lines to that client
    pub connections: Mutex<HashMap<String, mpsc::Sender<String>>>,
    /// session_id -> identity
    pub sessions: Mutex<HashMap<String, ClientInfo>>,
    /// folded nick -> session_id
    pub nicknames: Mutex<HashMap<String, String>>,
    /// folded channel name -> channel state
    pub channels: Mutex<HashMap<String, ChannelState>>,
    /// Per-channel transcript logger, when a log directory is configured.
    pub chanlog: Option<ChannelLog>,
    /// Topic/key persistence, when a state directory is configured.
    pub chanstate: Option<StateStore>,
}

impl SharedState {
    pub fn new(config: ServerConfig) -> Self {
        let chanlog = config.log_dir.clone().map(ChannelLog::new);
        let chanstate = config.state_dir.clone().map(StateStore::new);
        Self {
            server_name: config.server_name.clone(),
            config,
            connections: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            nicknames: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            chanlog,
            chanstate,
        }
    }

    /// Queue one line for a client. Appends CRLF and clamps to the wire
    /// limit. A full or closed queue is not an error here; the owning
    /// connection notices on its next pass.
    pub fn send_line(&self, session_id: &str, line: impl Into<String>) {
        let mut line = line.into();
        line.push_str("\r\n");
        clamp_line(&mut line);
        if let Some(tx) = self.connections.lock().unwrap().get(session_id) {
            let _ = tx.try_send(line);
        }
    }

    /// Look up a session by nickname, case folded.
    pub fn find_session(&self, nick: &str) -> Option<String> {
        self.nicknames.lock().unwrap().get(&irc::irc_lower(nick)).cloned()
    }

    /// Persist a channel's topic and key, if a state directory is
    /// configured.
    pub fn save_channel_state(&self, folded_name: &str, topic: &str, key: Option<&str>) {
        if let Some(store) = &self.chanstate {
            store.save(
                folded_name,
                &ChannelRecord {
                    topic: topic.to_string(),
                    key: key.map(str::to_string),
                },
            );
        }
    }

    /// Load persisted topic and key for a channel about to be created.
    pub fn load_channel_state(&self, folded_name: &str) -> ChannelRecord {
        match &self.chanstate {
            Some(store) => store.load(folded_name),
            None => ChannelRecord::default(),
        }
    }
}

pub struct Server {
    config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Bind all configured ports and run the accept loops forever.
    pub async fn run(self) -> Result<()> {
        let (_addrs, handle) = self.start().await?;
        handle.await?;
        Ok(())
    }

    /// Bind all configured ports and spawn the accept loops. Returns the
    /// bound addresses (useful with port 0) and the join handle of the
    /// accepting task.
    pub async fn start(self) -> Result<(Vec<SocketAddr>, JoinHandle<()>)> {
        let acceptor = build_tls_acceptor(&self.config)?;
        let state = Arc::new(SharedState::new(self.config));

        let mut listeners = Vec::new();
        let mut addrs = Vec::new();
        for port in &state.config.ports {
            let addr = state.config.bind_addr(*port);
            let listener = TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Could not bind {addr}"))?;
            let local = listener.local_addr()?;
            tracing::info!(%local, tls = acceptor.is_some(), "Listening");
            addrs.push(local);
            listeners.push(listener);
        }

        let handle = tokio::spawn(async move {
            let mut tasks = Vec::new();
            for listener in listeners {
                let state = Arc::clone(&state);
                let acceptor = acceptor.clone();
                tasks.push(tokio::spawn(accept_loop(listener, state, acceptor)));
            }
            for task in tasks {
                let _ = task.await;
            }
        });

        Ok((addrs, handle))
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<SharedState>, acceptor: Option<TlsAcceptor>) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!("Failed to accept connection: {e}");
                continue;
            }
        };
        tracing::info!(%addr, "Accepted connection");
        let state = Arc::clone(&state);
        match acceptor.clone() {
            Some(acceptor) => {
                tokio::spawn(async move {
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            if let Err(e) = connection::handle_generic(tls_stream, state, addr).await
                            {
                                tracing::warn!(%addr, "Connection error: {e}");
                            }
                        }
                        Err(e) => tracing::warn!(%addr, "TLS handshake failed: {e}"),
                    }
                });
            }
            None => {
                tokio::spawn(async move {
                    if let Err(e) = connection::handle(stream, state).await {
                        tracing::warn!(%addr, "Connection error: {e}");
                    }
                });
            }
        }
    }
}

fn build_tls_acceptor(config: &ServerConfig) -> Result<Option<TlsAcceptor>> {
    if !config.tls_enabled() {
        return Ok(None);
    }

    let cert_path = config.tls_cert.as_deref().unwrap();
    let key_path = config.tls_key.as_deref().unwrap();

    let cert_pem = std::fs::read(cert_path)
        .with_context(|| format!("Failed to read TLS cert: {}", cert_path.display()))?;
    let key_pem = std::fs::read(key_path)
        .with_context(|| format!("Failed to read TLS key: {}", key_path.display()))?;

    let certs: Vec<_> = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to parse TLS certificates")?;
    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .context("Failed to parse TLS private key")?
        .context("No private key found in PEM file")?;

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Invalid TLS configuration")?;

    Ok(Some(TlsAcceptor::from(Arc::new(tls_config))))
}
