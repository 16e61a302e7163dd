//! Broadcast helpers and NAMES reply chunking.

use std::collections::HashSet;

use crate::irc::MAX_LINE;
use crate::server::SharedState;

use super::Connection;

/// Send one line to every member of a channel, optionally excluding one
/// session (the sender, for PRIVMSG/NOTICE relay).
pub(super) fn broadcast_to_channel(
    state: &SharedState,
    folded_name: &str,
    exclude: Option<&str>,
    line: String,
) {
    let members: Vec<String> = state
        .channels
        .lock()
        .unwrap()
        .get(folded_name)
        .map(|ch| ch.members.iter().cloned().collect())
        .unwrap_or_default();

    for member in &members {
        if exclude == Some(member.as_str()) {
            continue;
        }
        state.send_line(member, line.clone());
    }
}

/// Send one line to every client sharing a channel with `conn`, each
/// exactly once even across shared channels.
pub(super) fn broadcast_related(
    state: &SharedState,
    conn: &Connection,
    include_self: bool,
    line: String,
) {
    let mut targets: HashSet<String> = HashSet::new();
    {
        let channels = state.channels.lock().unwrap();
        for folded in &conn.channels {
            if let Some(ch) = channels.get(folded) {
                targets.extend(ch.members.iter().cloned());
            }
        }
    }
    if include_self {
        targets.insert(conn.id.clone());
    } else {
        targets.remove(&conn.id);
    }
    for target in &targets {
        state.send_line(target, line.clone());
    }
}

/// Send the NAMES block (353s then 366) for one channel to `conn`.
/// `shown_name` is the name echoed in the replies; long rosters are split
/// so no single 353 exceeds the wire limit.
pub(super) fn send_names_block(
    conn: &Connection,
    state: &SharedState,
    shown_name: &str,
    folded_name: &str,
) {
    let mut nicks: Vec<String> = {
        let channels = state.channels.lock().unwrap();
        let sessions = state.sessions.lock().unwrap();
        channels
            .get(folded_name)
            .map(|ch| {
                ch.members
                    .iter()
                    .filter_map(|member| sessions.get(member).and_then(|info| info.nick.clone()))
                    .collect()
            })
            .unwrap_or_default()
    };
    nicks.sort();

    let nick = conn.nick_or_star();
    let prefix_len = format!(":{} 353 {nick} = {shown_name} :", state.server_name).len();
    for chunk in chunk_names(prefix_len, &nicks) {
        conn.reply(state, format!("353 {nick} = {shown_name} :{chunk}"));
    }
    conn.reply(state, format!("366 {nick} {shown_name} :End of NAMES list"));
}

/// Greedily pack nicknames into space-joined chunks so that each chunk
/// plus the given prefix and CRLF fits in [`MAX_LINE`] bytes. An empty
/// roster still yields one empty chunk so a 353 is always sent.
pub(super) fn chunk_names(prefix_len: usize, nicks: &[String]) -> Vec<String> {
    let budget = MAX_LINE.saturating_sub(prefix_len + 2);
    let mut chunks = Vec::new();
    let mut current = String::new();
    for nick in nicks {
        let needed = if current.is_empty() {
            nick.len()
        } else {
            current.len() + 1 + nick.len()
        };
        if !current.is_empty() && needed > budget {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(nick);
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::chunk_names;
    use crate::irc::MAX_LINE;

    #[test]
    fn empty_roster_still_yields_one_chunk() {
        assert_eq!(chunk_names(40, &[]), vec![String::new()]);
    }

    #[test]
    fn short_roster_is_one_chunk() {
        let nicks = vec!["alice".to_string(), "bob".to_string()];
        assert_eq!(chunk_names(40, &nicks), vec!["alice bob".to_string()]);
    }

    #[test]
    fn long_roster_splits_under_the_cap() {
        let prefix_len = ":server 353 alice = #room :".len();
        let nicks: Vec<String> = (0..100).map(|i| format!("member{i:03}")).collect();
        let chunks = chunk_names(prefix_len, &nicks);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(prefix_len + chunk.len() + 2 <= MAX_LINE);
        }
        let rejoined: Vec<String> = chunks
            .iter()
            .flat_map(|c| c.split(' ').map(str::to_string))
            .collect();
        assert_eq!(rejoined, nicks);
    }
}
