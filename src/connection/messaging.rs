//! Message relay: PRIVMSG, NOTICE, and WALLOPS.

use crate::irc::{self, Message};
use crate::server::SharedState;

use super::helpers::broadcast_to_channel;
use super::Connection;

/// PRIVMSG and NOTICE share one handler; only the relayed command word
/// differs. A nickname target gets the message directly; a channel target
/// is relayed to every member except the sender.
pub(super) fn handle_privmsg(
    conn: &Connection,
    state: &SharedState,
    command: &str,
    params: &[String],
) {
    let nick = conn.nick_or_star();
    if params.is_empty() {
        conn.reply(state, format!("411 {nick} :No recipient given ({command})"));
        return;
    }
    let Some(text) = params.get(1) else {
        conn.reply(state, format!("412 {nick} :No text to send"));
        return;
    };
    let target = &params[0];

    if let Some(session) = state.find_session(target) {
        state.send_line(
            &session,
            format!(":{} {command} {target} :{text}", conn.prefix()),
        );
        return;
    }

    let folded = irc::irc_lower(target);
    // The relayed line carries the channel's stored name, not whatever
    // case the sender typed.
    let display = state
        .channels
        .lock()
        .unwrap()
        .get(&folded)
        .map(|ch| ch.name.clone());
    if let Some(display) = display {
        broadcast_to_channel(
            state,
            &folded,
            Some(&conn.id),
            format!(":{} {command} {display} :{text}", conn.prefix()),
        );
        if let Some(log) = &state.chanlog {
            log.speech(&folded, nick, text);
        }
    } else {
        conn.reply(state, format!("401 {nick} {target} :No such nick/channel"));
    }
}

/// WALLOPS is repurposed as a global notice to every registered client.
pub(super) fn handle_wallops(conn: &Connection, state: &SharedState, msg: &Message) {
    let Some(text) = msg.params.first() else {
        conn.reply_461(state, "WALLOPS");
        return;
    };

    let recipients: Vec<(String, String)> = state
        .sessions
        .lock()
        .unwrap()
        .iter()
        .filter_map(|(id, info)| info.nick.clone().map(|nick| (id.clone(), nick)))
        .collect();

    for (session, nick) in &recipients {
        state.send_line(
            session,
            format!(":{} NOTICE {nick} :Global notice: {text}", conn.prefix()),
        );
    }
}
