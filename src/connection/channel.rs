//! Channel operations: JOIN, PART, TOPIC, MODE, NAMES, LIST.

use crate::irc::{self, Message};
use crate::server::{ChannelState, SharedState};

use super::helpers::{broadcast_to_channel, send_names_block};
use super::Connection;

pub(super) fn handle_join(conn: &mut Connection, state: &SharedState, msg: &Message) {
    let Some(arg) = msg.params.first() else {
        conn.reply_461(state, "JOIN");
        return;
    };

    // JOIN 0 parts every channel.
    if arg == "0" {
        let my_channels: Vec<String> = conn.channels.drain().collect();
        for folded in my_channels {
            broadcast_to_channel(
                state,
                &folded,
                None,
                format!(":{} PART {}", conn.prefix(), folded),
            );
            if let Some(log) = &state.chanlog {
                log.meta(&folded, conn.nick_or_star(), "left");
            }
            remove_member(state, &folded, &conn.id);
        }
        return;
    }

    let names: Vec<&str> = arg.split(',').collect();
    let keys: Vec<&str> = msg
        .params
        .get(1)
        .map(|k| k.split(',').collect())
        .unwrap_or_default();

    for (i, name) in names.iter().enumerate() {
        let folded = irc::irc_lower(name);
        if conn.channels.contains(&folded) {
            continue;
        }
        if !irc::valid_channel_name(name) {
            conn.reply_403(state, name);
            continue;
        }

        // Materialize the channel, loading any persisted topic and key.
        // The load happens outside the lock; the entry is only inserted
        // if nobody else created it meanwhile.
        if !state.channels.lock().unwrap().contains_key(&folded) {
            let record = state.load_channel_state(&folded);
            state
                .channels
                .lock()
                .unwrap()
                .entry(folded.clone())
                .or_insert_with(|| ChannelState::new(name.to_string(), record));
        }

        let key_ok = {
            let channels = state.channels.lock().unwrap();
            match channels.get(&folded).and_then(|ch| ch.key.as_deref()) {
                Some(key) => keys.get(i).copied() == Some(key),
                None => true,
            }
        };
        if !key_ok {
            conn.reply(
                state,
                format!(
                    "475 {} {} :Cannot join channel (+k) - bad key",
                    conn.nick_or_star(),
                    name
                ),
            );
            // A channel materialized just for this check must not linger
            // empty in the registry.
            let mut channels = state.channels.lock().unwrap();
            if channels.get(&folded).is_some_and(|ch| ch.members.is_empty()) {
                channels.remove(&folded);
            }
            continue;
        }

        let (display, topic) = {
            let mut channels = state.channels.lock().unwrap();
            let Some(ch) = channels.get_mut(&folded) else {
                continue;
            };
            ch.members.insert(conn.id.clone());
            (ch.name.clone(), ch.topic.clone())
        };
        conn.channels.insert(folded.clone());

        if let Some(log) = &state.chanlog {
            log.meta(&display, conn.nick_or_star(), "joined");
        }
        broadcast_to_channel(state, &folded, None, format!(":{} JOIN {}", conn.prefix(), name));

        if topic.is_empty() {
            conn.reply(
                state,
                format!("331 {} {display} :No topic is set", conn.nick_or_star()),
            );
        } else {
            conn.reply(
                state,
                format!("332 {} {display} :{topic}", conn.nick_or_star()),
            );
        }
        send_names_block(conn, state, name, &folded);
    }
}

pub(super) fn handle_part(conn: &mut Connection, state: &SharedState, msg: &Message) {
    let Some(arg) = msg.params.first() else {
        conn.reply_461(state, "PART");
        return;
    };
    let partmsg = msg
        .params
        .get(1)
        .cloned()
        .unwrap_or_else(|| conn.nick_or_star().to_string());

    for name in arg.split(',') {
        if !irc::valid_channel_name(name) {
            conn.reply_403(state, name);
            continue;
        }
        let folded = irc::irc_lower(name);
        if !conn.channels.contains(&folded) {
            conn.reply(
                state,
                format!(
                    "442 {} {name} :You're not on that channel",
                    conn.nick_or_star()
                ),
            );
            continue;
        }

        // Announce before any membership changes.
        broadcast_to_channel(
            state,
            &folded,
            None,
            format!(":{} PART {name} :{partmsg}", conn.prefix()),
        );
        if let Some(log) = &state.chanlog {
            log.meta(&folded, conn.nick_or_star(), &format!("left ({partmsg})"));
        }
        conn.channels.remove(&folded);
        remove_member(state, &folded, &conn.id);
    }
}

pub(super) fn handle_topic(conn: &Connection, state: &SharedState, msg: &Message) {
    let Some(name) = msg.params.first() else {
        conn.reply_461(state, "TOPIC");
        return;
    };
    let folded = irc::irc_lower(name);
    if !conn.channels.contains(&folded) {
        conn.reply(
            state,
            format!(
                "442 {} {name} :You're not on that channel",
                conn.nick_or_star()
            ),
        );
        return;
    }

    match msg.params.get(1) {
        Some(newtopic) => {
            let key = {
                let mut channels = state.channels.lock().unwrap();
                let Some(ch) = channels.get_mut(&folded) else {
                    return;
                };
                ch.topic = newtopic.clone();
                ch.key.clone()
            };
            state.save_channel_state(&folded, newtopic, key.as_deref());
            if let Some(log) = &state.chanlog {
                log.meta(
                    &folded,
                    conn.nick_or_star(),
                    &format!("set topic to {newtopic:?}"),
                );
            }
            broadcast_to_channel(
                state,
                &folded,
                None,
                format!(":{} TOPIC {name} :{newtopic}", conn.prefix()),
            );
        }
        None => {
            let (display, topic) = {
                let channels = state.channels.lock().unwrap();
                match channels.get(&folded) {
                    Some(ch) => (ch.name.clone(), ch.topic.clone()),
                    None => return,
                }
            };
            if topic.is_empty() {
                conn.reply(
                    state,
                    format!("331 {} {display} :No topic is set", conn.nick_or_star()),
                );
            } else {
                conn.reply(
                    state,
                    format!("332 {} {display} :{topic}", conn.nick_or_star()),
                );
            }
        }
    }
}

pub(super) fn handle_mode(conn: &Connection, state: &SharedState, msg: &Message) {
    let Some(target) = msg.params.first() else {
        conn.reply_461(state, "MODE");
        return;
    };
    let nick = conn.nick_or_star();
    let folded = irc::irc_lower(target);
    let is_channel = state.channels.lock().unwrap().contains_key(&folded);

    if is_channel {
        let is_member = conn.channels.contains(&folded);
        match msg.params.get(1).map(String::as_str) {
            None => {
                // Mode query. The key itself is only shown to members.
                let key = {
                    let channels = state.channels.lock().unwrap();
                    channels.get(&folded).and_then(|ch| ch.key.clone())
                };
                let modes = match key {
                    Some(key) if is_member => format!("+k {key}"),
                    Some(_) => "+k".to_string(),
                    None => "+".to_string(),
                };
                conn.reply(state, format!("324 {nick} {target} {modes}"));
            }
            Some("+k") => {
                let Some(key) = msg.params.get(2) else {
                    conn.reply_461(state, "MODE");
                    return;
                };
                if !is_member {
                    conn.reply(
                        state,
                        format!("442 {nick} {target} :You're not on that channel"),
                    );
                    return;
                }
                let (display, topic) = {
                    let mut channels = state.channels.lock().unwrap();
                    let Some(ch) = channels.get_mut(&folded) else {
                        return;
                    };
                    ch.key = Some(key.clone());
                    (ch.name.clone(), ch.topic.clone())
                };
                state.save_channel_state(&folded, &topic, Some(key));
                if let Some(log) = &state.chanlog {
                    log.meta(&folded, nick, &format!("set channel key to {key}"));
                }
                broadcast_to_channel(
                    state,
                    &folded,
                    None,
                    format!(":{} MODE {display} +k {key}", conn.prefix()),
                );
            }
            Some("-k") => {
                if !is_member {
                    conn.reply(
                        state,
                        format!("442 {nick} {target} :You're not on that channel"),
                    );
                    return;
                }
                let (display, topic) = {
                    let mut channels = state.channels.lock().unwrap();
                    let Some(ch) = channels.get_mut(&folded) else {
                        return;
                    };
                    ch.key = None;
                    (ch.name.clone(), ch.topic.clone())
                };
                state.save_channel_state(&folded, &topic, None);
                if let Some(log) = &state.chanlog {
                    log.meta(&folded, nick, "removed channel key");
                }
                broadcast_to_channel(
                    state,
                    &folded,
                    None,
                    format!(":{} MODE {display} -k", conn.prefix()),
                );
            }
            Some(flag) => {
                conn.reply(state, format!("472 {nick} {flag} :Unknown MODE flag"));
            }
        }
    } else if conn.nick.as_deref() == Some(target.as_str()) {
        if msg.params.len() == 1 {
            conn.reply(state, format!("221 {nick} +"));
        } else {
            conn.reply(state, format!("501 {nick} :Unknown MODE flag"));
        }
    } else {
        conn.reply_403(state, target);
    }
}

pub(super) fn handle_names(conn: &Connection, state: &SharedState, msg: &Message) {
    match msg.params.first() {
        Some(arg) => {
            for name in arg.split(',') {
                let folded = irc::irc_lower(name);
                if state.channels.lock().unwrap().contains_key(&folded) {
                    send_names_block(conn, state, name, &folded);
                } else {
                    conn.reply_403(state, name);
                }
            }
        }
        None => {
            let mut mine: Vec<String> = conn.channels.iter().cloned().collect();
            mine.sort();
            for folded in mine {
                let display = {
                    let channels = state.channels.lock().unwrap();
                    match channels.get(&folded) {
                        Some(ch) => ch.name.clone(),
                        None => continue,
                    }
                };
                send_names_block(conn, state, &display, &folded);
            }
        }
    }
}

pub(super) fn handle_list(conn: &Connection, state: &SharedState, msg: &Message) {
    let mut listed: Vec<(String, usize, String)> = {
        let channels = state.channels.lock().unwrap();
        match msg.params.first() {
            // Unknown names are silently skipped.
            Some(arg) => arg
                .split(',')
                .filter_map(|name| channels.get(&irc::irc_lower(name)))
                .map(|ch| (ch.name.clone(), ch.members.len(), ch.topic.clone()))
                .collect(),
            None => channels
                .values()
                .map(|ch| (ch.name.clone(), ch.members.len(), ch.topic.clone()))
                .collect(),
        }
    };
    listed.sort();

    let nick = conn.nick_or_star();
    for (name, count, topic) in &listed {
        conn.reply(state, format!("322 {nick} {name} {count} :{topic}"));
    }
    conn.reply(state, format!("323 {nick} :End of LIST"));
}

/// Drop a session from a channel's member set, removing the channel from
/// the registry when it empties out.
fn remove_member(state: &SharedState, folded_name: &str, session_id: &str) {
    let mut channels = state.channels.lock().unwrap();
    if let Some(ch) = channels.get_mut(folded_name) {
        ch.members.remove(session_id);
        if ch.members.is_empty() {
            channels.remove(folded_name);
        }
    }
}
