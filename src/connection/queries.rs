//! Query commands: WHO, WHOIS, ISON, PING.

use crate::irc::{self, Message};
use crate::server::SharedState;

use super::Connection;

pub(super) fn handle_who(conn: &Connection, state: &SharedState, msg: &Message) {
    let Some(target) = msg.params.first() else {
        return;
    };
    let folded = irc::irc_lower(target);
    let nick = conn.nick_or_star();

    // WHO against anything but a channel is a no-op.
    let members: Vec<String> = {
        let channels = state.channels.lock().unwrap();
        match channels.get(&folded) {
            Some(ch) => ch.members.iter().cloned().collect(),
            None => return,
        }
    };

    let mut rows: Vec<(String, String, String, String)> = {
        let sessions = state.sessions.lock().unwrap();
        members
            .iter()
            .filter_map(|member| {
                let info = sessions.get(member)?;
                Some((
                    info.nick.clone()?,
                    info.user.clone().unwrap_or_else(|| "*".into()),
                    info.host.clone(),
                    info.realname.clone().unwrap_or_default(),
                ))
            })
            .collect()
    };
    rows.sort();

    for (member_nick, user, host, realname) in &rows {
        conn.reply(
            state,
            format!(
                "352 {nick} {target} {user} {host} {} {member_nick} H :0 {realname}",
                state.server_name
            ),
        );
    }
    conn.reply(state, format!("315 {nick} {target} :End of WHO list"));
}

pub(super) fn handle_whois(conn: &Connection, state: &SharedState, msg: &Message) {
    let Some(target) = msg.params.first() else {
        return;
    };
    let nick = conn.nick_or_star();

    let Some(session) = state.find_session(target) else {
        conn.reply(state, format!("401 {nick} {target} :No such nick"));
        return;
    };

    let Some(info) = state.sessions.lock().unwrap().get(&session).cloned() else {
        conn.reply(state, format!("401 {nick} {target} :No such nick"));
        return;
    };
    let target_nick = info.nick.as_deref().unwrap_or(target);

    conn.reply(
        state,
        format!(
            "311 {nick} {target_nick} {} {} * :{}",
            info.user.as_deref().unwrap_or("*"),
            info.host,
            info.realname.as_deref().unwrap_or_default()
        ),
    );
    conn.reply(
        state,
        format!(
            "312 {nick} {target_nick} {} :{}",
            state.server_name, state.server_name
        ),
    );

    let mut in_channels: Vec<String> = {
        let channels = state.channels.lock().unwrap();
        channels
            .iter()
            .filter(|(_, ch)| ch.members.contains(&session))
            .map(|(folded, _)| folded.clone())
            .collect()
    };
    in_channels.sort();
    if !in_channels.is_empty() {
        conn.reply(
            state,
            format!("319 {nick} {target_nick} :{} ", in_channels.join(" ")),
        );
    }
    conn.reply(
        state,
        format!("318 {nick} {target_nick} :End of WHOIS list"),
    );
}

pub(super) fn handle_ison(conn: &Connection, state: &SharedState, msg: &Message) {
    if msg.params.is_empty() {
        conn.reply_461(state, "ISON");
        return;
    }
    let online: Vec<&str> = msg
        .params
        .iter()
        .map(String::as_str)
        .filter(|nick| state.find_session(nick).is_some())
        .collect();
    conn.reply(
        state,
        format!("303 {} :{}", conn.nick_or_star(), online.join(" ")),
    );
}

pub(super) fn handle_ping(conn: &Connection, state: &SharedState, msg: &Message) {
    match msg.params.first() {
        Some(origin) => {
            conn.reply(state, format!("PONG {} :{origin}", state.server_name));
        }
        None => {
            conn.reply(
                state,
                format!("409 {} :No origin specified", conn.nick_or_star()),
            );
        }
    }
}
