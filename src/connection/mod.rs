//! Per-client connection handling.
//!
//! Each accepted socket gets one task running the read loop and one task
//! draining the write queue. The read loop waits for lines with a ten
//! second timeout; the timeout doubles as the liveness sweep for this
//! connection (PING after 90 seconds of silence, disconnect after 180).
//!
//! The handler is split into submodules:
//! - [`registration`]: PASS, CAP, NICK, USER, the welcome block, LUSERS, MOTD
//! - [`channel`]: JOIN, PART, TOPIC, MODE, NAMES, LIST
//! - [`messaging`]: PRIVMSG, NOTICE, WALLOPS
//! - [`queries`]: WHO, WHOIS, ISON, PING
//! - [`helpers`]: channel and related-client broadcasts, NAMES chunking

mod channel;
mod helpers;
mod messaging;
mod queries;
mod registration;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::irc::Message;
use crate::server::{ClientInfo, SharedState};

/// Send a PING after this much silence (registered clients only;
/// unregistered clients are disconnected instead).
const PING_AFTER: Duration = Duration::from_secs(90);
/// Disconnect after this much silence.
const PING_TIMEOUT: Duration = Duration::from_secs(180);
/// Liveness check cadence.
const SWEEP: Duration = Duration::from_secs(10);
/// Reads longer than this are dropped rather than buffered without bound.
const MAX_READ: usize = 8192;

/// Which command handler is in effect for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handler {
    /// Waiting for the connection password. Only entered when one is
    /// configured.
    Password,
    /// Waiting for NICK and USER (and CAP END if negotiation started).
    Registration,
    Registered,
}

/// State of a single client connection, owned by its read-loop task.
/// Identity fields are mirrored into [`SharedState::sessions`] so other
/// connections can see them.
pub struct Connection {
    pub id: String,
    pub nick: Option<String>,
    pub user: Option<String>,
    pub realname: Option<String>,
    /// Host used in this client's prefix; the configured cloak if any.
    pub host: String,
    /// Folded names of the channels this client is in.
    pub channels: HashSet<String>,
    pub(crate) handler: Handler,
    /// Set by CAP LS/REQ, cleared by CAP END. Gates the welcome block.
    pub(crate) cap_pending: bool,
}

impl Connection {
    fn new(id: String, host: String, has_password: bool) -> Self {
        Self {
            id,
            nick: None,
            user: None,
            realname: None,
            host,
            channels: HashSet::new(),
            handler: if has_password {
                Handler::Password
            } else {
                Handler::Registration
            },
            cap_pending: false,
        }
    }

    pub(crate) fn nick_or_star(&self) -> &str {
        self.nick.as_deref().unwrap_or("*")
    }

    pub(crate) fn registered(&self) -> bool {
        self.handler == Handler::Registered
    }

    /// The `nick!user@host` form prepended to messages relayed for this
    /// client.
    pub(crate) fn prefix(&self) -> String {
        format!(
            "{}!{}@{}",
            self.nick.as_deref().unwrap_or("*"),
            self.user.as_deref().unwrap_or("*"),
            self.host
        )
    }

    /// Queue a server-originated reply (`:<server> <payload>`).
    pub(crate) fn reply(&self, state: &SharedState, payload: impl AsRef<str>) {
        state.send_line(
            &self.id,
            format!(":{} {}", state.server_name, payload.as_ref()),
        );
    }

    pub(crate) fn reply_403(&self, state: &SharedState, channel: &str) {
        self.reply(
            state,
            format!("403 {} {} :No such channel", self.nick_or_star(), channel),
        );
    }

    pub(crate) fn reply_461(&self, state: &SharedState, command: &str) {
        self.reply(
            state,
            format!(
                "461 {} {} :Not enough parameters",
                self.nick_or_star(),
                command
            ),
        );
    }
}

/// Handle a plain TCP connection.
pub async fn handle(stream: TcpStream, state: Arc<SharedState>) -> Result<()> {
    let peer = stream.peer_addr()?;
    let (reader, writer) = tokio::io::split(stream);
    handle_io(BufReader::new(reader), writer, peer, state).await
}

/// Handle an already-wrapped stream (TLS).
pub async fn handle_generic<S>(stream: S, state: Arc<SharedState>, peer: SocketAddr) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    handle_io(BufReader::new(reader), writer, peer, state).await
}

async fn handle_io<R, W>(
    mut reader: BufReader<R>,
    mut writer: W,
    peer: SocketAddr,
    state: Arc<SharedState>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let session_id = peer.to_string();
    let host = state
        .config
        .cloak
        .clone()
        .unwrap_or_else(|| peer.ip().to_string());
    let mut conn = Connection::new(session_id.clone(), host.clone(), state.config.password.is_some());

    // Queue for lines going TO this client. The sender lives in the shared
    // connections map so any handler can reach this client.
    let (tx, mut rx) = mpsc::channel::<String>(4096);
    state
        .connections
        .lock()
        .unwrap()
        .insert(session_id.clone(), tx.clone());
    state
        .sessions
        .lock()
        .unwrap()
        .insert(session_id.clone(), ClientInfo::new(host));

    let write_session_id = session_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                tracing::warn!(session_id = %write_session_id, "Write error: {e}");
                break;
            }
            // Drain queued lines in one batch before flushing.
            let mut batched = 0;
            while let Ok(queued) = rx.try_recv() {
                if let Err(e) = writer.write_all(queued.as_bytes()).await {
                    tracing::warn!(session_id = %write_session_id, "Write error: {e}");
                    return;
                }
                batched += 1;
                if batched >= 64 {
                    break;
                }
            }
            if let Err(e) = writer.flush().await {
                tracing::warn!(session_id = %write_session_id, "Flush error: {e}");
                break;
            }
        }
    });

    let mut line_buf = String::new();
    let mut last_activity = Instant::now();
    let mut ping_sent = false;
    let quit_reason: String;

    loop {
        // line_buf is not cleared before the read so a partial line
        // interrupted by the timeout is kept for the next pass.
        match tokio::time::timeout(SWEEP, reader.read_line(&mut line_buf)).await {
            Err(_) => {
                let idle = last_activity.elapsed();
                if idle > PING_TIMEOUT {
                    quit_reason = "ping timeout".into();
                    break;
                }
                if idle > PING_AFTER {
                    if conn.registered() {
                        if !ping_sent {
                            state.send_line(&session_id, format!("PING :{}", state.server_name));
                            ping_sent = true;
                        }
                    } else {
                        quit_reason = "ping timeout".into();
                        break;
                    }
                }
                if line_buf.len() > MAX_READ {
                    line_buf.clear();
                }
                continue;
            }
            Ok(Ok(0)) => {
                quit_reason = "EOT".into();
                break;
            }
            Ok(Err(e)) => {
                quit_reason = e.to_string();
                break;
            }
            Ok(Ok(_)) => {}
        }

        last_activity = Instant::now();
        ping_sent = false;

        let line = std::mem::take(&mut line_buf);
        if line.len() > MAX_READ {
            tracing::debug!(%session_id, len = line.len(), "Dropping overlong line");
            continue;
        }
        let Some(msg) = Message::parse(&line) else {
            continue;
        };
        tracing::debug!(%session_id, "<- {}", line.trim_end());

        match conn.handler {
            Handler::Password => match msg.command.as_str() {
                "PASS" => registration::handle_pass(&mut conn, &state, &msg),
                "CAP" => registration::handle_cap(&mut conn, &state, &msg),
                "QUIT" => {
                    quit_reason = "Client quit".into();
                    break;
                }
                // Anything else is silently ignored until the password
                // has been accepted.
                _ => {}
            },
            Handler::Registration => match msg.command.as_str() {
                "NICK" => registration::handle_nick(&mut conn, &state, &msg),
                "USER" => registration::handle_user(&mut conn, &state, &msg),
                "CAP" => registration::handle_cap(&mut conn, &state, &msg),
                "QUIT" => {
                    quit_reason = "Client quit".into();
                    break;
                }
                _ => {}
            },
            Handler::Registered => match msg.command.as_str() {
                "NICK" => registration::handle_nick(&mut conn, &state, &msg),
                "JOIN" => channel::handle_join(&mut conn, &state, &msg),
                "PART" => channel::handle_part(&mut conn, &state, &msg),
                "TOPIC" => channel::handle_topic(&conn, &state, &msg),
                "MODE" => channel::handle_mode(&conn, &state, &msg),
                "NAMES" => channel::handle_names(&conn, &state, &msg),
                "LIST" => channel::handle_list(&conn, &state, &msg),
                "PRIVMSG" | "NOTICE" => {
                    messaging::handle_privmsg(&conn, &state, &msg.command, &msg.params)
                }
                "WALLOPS" => messaging::handle_wallops(&conn, &state, &msg),
                "WHO" => queries::handle_who(&conn, &state, &msg),
                "WHOIS" => queries::handle_whois(&conn, &state, &msg),
                "ISON" => queries::handle_ison(&conn, &state, &msg),
                "LUSERS" => registration::send_lusers(&conn, &state),
                "MOTD" => registration::send_motd(&conn, &state),
                "PING" => queries::handle_ping(&conn, &state, &msg),
                // Liveness bookkeeping already happened on the read.
                "PONG" => {}
                // Away tracking is not supported; the command is accepted
                // and ignored.
                "AWAY" => {}
                "QUIT" => {
                    quit_reason = msg
                        .params
                        .first()
                        .cloned()
                        .unwrap_or_else(|| conn.nick_or_star().to_string());
                    break;
                }
                other => {
                    conn.reply(
                        &state,
                        format!("421 {} {} :Unknown command", conn.nick_or_star(), other),
                    );
                }
            },
        }
    }

    disconnect(&conn, &state, &quit_reason);

    // Dropping our sender after removing the map entry lets the writer
    // drain everything queued (including the ERROR line) and exit.
    state.connections.lock().unwrap().remove(&session_id);
    drop(tx);
    let _ = write_handle.await;

    tracing::info!(
        %session_id,
        nick = conn.nick.as_deref().unwrap_or("-"),
        reason = %quit_reason,
        "Disconnected"
    );
    Ok(())
}

/// Tear down a connection: ERROR to the client, one QUIT to every peer
/// sharing a channel, transcript entries, then removal from the registry.
/// The broadcast is computed before any membership is removed.
fn disconnect(conn: &Connection, state: &SharedState, reason: &str) {
    state.send_line(&conn.id, format!("ERROR :{reason}"));

    if !conn.channels.is_empty() {
        let quit_line = format!(":{} QUIT :{}", conn.prefix(), reason);
        let mut notified: HashSet<String> = HashSet::new();
        {
            let channels = state.channels.lock().unwrap();
            for folded in &conn.channels {
                if let Some(ch) = channels.get(folded) {
                    for member in &ch.members {
                        if member != &conn.id {
                            notified.insert(member.clone());
                        }
                    }
                }
            }
        }
        for member in &notified {
            state.send_line(member, quit_line.clone());
        }

        if let Some(log) = &state.chanlog {
            for folded in &conn.channels {
                log.meta(folded, conn.nick_or_star(), &format!("quit ({reason})"));
            }
        }

        let mut channels = state.channels.lock().unwrap();
        for folded in &conn.channels {
            if let Some(ch) = channels.get_mut(folded) {
                ch.members.remove(&conn.id);
            }
        }
        channels.retain(|_, ch| !ch.members.is_empty());
    }

    if let Some(nick) = &conn.nick {
        state.nicknames.lock().unwrap().remove(&crate::irc::irc_lower(nick));
    }
    state.sessions.lock().unwrap().remove(&conn.id);
}
