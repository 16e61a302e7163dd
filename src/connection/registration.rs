//! Registration: PASS, CAP negotiation, NICK, USER, and the welcome block.

use crate::irc::{self, Message};
use crate::server::SharedState;

use super::helpers::broadcast_related;
use super::{Connection, Handler};

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub(super) fn handle_pass(conn: &mut Connection, state: &SharedState, msg: &Message) {
    let Some(supplied) = msg.params.first() else {
        conn.reply_461(state, "PASS");
        return;
    };
    if Some(supplied.to_lowercase()) == state.config.password {
        conn.handler = Handler::Registration;
    } else {
        conn.reply(state, "464 :Password incorrect");
    }
}

/// Capability negotiation stub. Nothing is offered; REQ is refused. The
/// pending flag keeps the welcome block from being sent mid-negotiation.
pub(super) fn handle_cap(conn: &mut Connection, state: &SharedState, msg: &Message) {
    let subcmd = msg.params.first().map(|s| s.to_ascii_uppercase());
    match subcmd.as_deref() {
        Some("LS") => {
            conn.cap_pending = true;
            conn.reply(state, "CAP * LS :");
        }
        Some("REQ") => {
            conn.cap_pending = true;
            let caps = msg.params.get(1).map(String::as_str).unwrap_or("");
            conn.reply(state, format!("CAP * NAK :{caps}"));
        }
        Some("END") => {
            conn.cap_pending = false;
            try_complete_registration(conn, state);
        }
        _ => {}
    }
}

pub(super) fn handle_nick(conn: &mut Connection, state: &SharedState, msg: &Message) {
    let Some(newnick) = msg.params.first() else {
        conn.reply(state, "431 :No nickname given");
        return;
    };

    // Setting the nick you already own is a no-op.
    if conn.nick.as_deref() == Some(newnick.as_str()) {
        return;
    }
    if let Some(owner) = state.find_session(newnick) {
        if owner != conn.id {
            conn.reply(
                state,
                format!(
                    "433 {} {} :Nickname is already in use",
                    conn.nick_or_star(),
                    newnick
                ),
            );
            return;
        }
    }
    if !irc::valid_nickname(newnick) {
        conn.reply(
            state,
            format!(
                "432 {} {} :Erroneous nickname",
                conn.nick_or_star(),
                newnick
            ),
        );
        return;
    }

    if conn.registered() {
        if let Some(log) = &state.chanlog {
            for folded in &conn.channels {
                log.meta(
                    folded,
                    conn.nick_or_star(),
                    &format!("changed nickname to {newnick}"),
                );
            }
        }
    }

    // The index update happens before anything else sees the new name;
    // the change broadcast carries the old nick in the prefix.
    let old_prefix = conn.prefix();
    let old = conn.nick.replace(newnick.clone());
    {
        let mut nicknames = state.nicknames.lock().unwrap();
        if let Some(old) = &old {
            nicknames.remove(&irc::irc_lower(old));
        }
        nicknames.insert(irc::irc_lower(newnick), conn.id.clone());
    }
    if let Some(info) = state.sessions.lock().unwrap().get_mut(&conn.id) {
        info.nick = Some(newnick.clone());
    }

    if conn.registered() {
        broadcast_related(state, conn, true, format!(":{old_prefix} NICK {newnick}"));
    } else {
        try_complete_registration(conn, state);
    }
}

pub(super) fn handle_user(conn: &mut Connection, state: &SharedState, msg: &Message) {
    if msg.params.len() < 4 {
        conn.reply_461(state, "USER");
        return;
    }
    conn.user = Some(msg.params[0].clone());
    conn.realname = Some(msg.params[3].clone());
    if let Some(info) = state.sessions.lock().unwrap().get_mut(&conn.id) {
        info.user = conn.user.clone();
        info.realname = conn.realname.clone();
    }
    try_complete_registration(conn, state);
}

pub(super) fn try_complete_registration(conn: &mut Connection, state: &SharedState) {
    if conn.registered() || conn.cap_pending {
        return;
    }
    if conn.nick.is_none() || conn.user.is_none() {
        return;
    }
    conn.handler = Handler::Registered;

    let nick = conn.nick_or_star().to_string();
    conn.reply(state, format!("001 {nick} :Hi, welcome to IRC"));
    conn.reply(
        state,
        format!(
            "002 {nick} :Your host is {}, running version miniircd-{VERSION}",
            state.server_name
        ),
    );
    conn.reply(state, format!("003 {nick} :This server was created sometime"));
    conn.reply(
        state,
        format!("004 {nick} :{} miniircd-{VERSION} o o", state.server_name),
    );
    send_lusers(conn, state);
    send_motd(conn, state);
}

pub(super) fn send_lusers(conn: &Connection, state: &SharedState) {
    let count = state.connections.lock().unwrap().len();
    conn.reply(
        state,
        format!(
            "251 {} :There are {count} users and 0 services on 1 server",
            conn.nick_or_star()
        ),
    );
}

pub(super) fn send_motd(conn: &Connection, state: &SharedState) {
    let nick = conn.nick_or_star();
    match &state.config.motd {
        Some(motd) => {
            conn.reply(
                state,
                format!("375 {nick} :- {} Message of the day -", state.server_name),
            );
            for line in motd.lines() {
                conn.reply(state, format!("372 {nick} :- {line}"));
            }
            conn.reply(state, format!("376 {nick} :End of /MOTD command"));
        }
        None => {
            conn.reply(state, format!("422 {nick} :MOTD File is missing"));
        }
    }
}
