//! IRC wire protocol: line tokenization, canonical case folding, and
//! validation of nicknames and channel names.
//!
//! Lines are at most [`MAX_LINE`] bytes on the wire, including the CRLF
//! terminator. Incoming lines are tokenized into a command plus arguments;
//! outgoing lines are plain strings built by the handlers, clamped to the
//! limit at the point they are queued for a client.

/// Maximum length of a protocol line, including the trailing CRLF.
pub const MAX_LINE: usize = 512;

/// A parsed client command.
///
/// Tokenization:
/// 1. Split once on the first space into command and rest; the command is
///    uppercased for dispatch.
/// 2. If the rest begins with `:`, the whole remainder after the colon is a
///    single argument.
/// 3. Otherwise split once on ` :` into head and trailing; the head is
///    whitespace-split into arguments and the trailing part (which may
///    contain spaces) is appended verbatim as the last argument.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    /// Parse a single line (the trailing line separator may be present).
    /// Returns `None` for empty lines.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return None;
        }

        let (command, rest) = match line.split_once(' ') {
            Some((c, r)) => (c, r),
            None => (line, ""),
        };
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        if !rest.is_empty() {
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
            } else {
                match rest.split_once(" :") {
                    Some((head, trailing)) => {
                        params.extend(head.split_whitespace().map(str::to_string));
                        params.push(trailing.to_string());
                    }
                    None => {
                        params.extend(rest.split_whitespace().map(str::to_string));
                    }
                }
            }
        }

        Some(Message {
            command: command.to_ascii_uppercase(),
            params,
        })
    }
}

/// Case-fold a nickname or channel name for map lookups.
///
/// ASCII uppercase folds to lowercase, and per the RFC's "scandinavian"
/// rule `[ ] \ ^` fold to `{ } | ~`. Display always keeps the bytes the
/// client supplied; only lookups go through this.
pub fn irc_lower(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'A'..='Z' => c.to_ascii_lowercase(),
            '[' => '{',
            ']' => '}',
            '\\' => '|',
            '^' => '~',
            _ => c,
        })
        .collect()
}

/// Transform a channel name into a filesystem-safe file stem: the folded
/// name with `_` doubled and `/` replaced by `_`.
pub fn safe_file_stem(name: &str) -> String {
    irc_lower(name).replace('_', "__").replace('/', "_")
}

fn nick_first_char(c: char) -> bool {
    c.is_ascii_alphabetic() || matches!(c, '[' | ']' | '\\' | '`' | '_' | '^' | '{' | '|' | '}')
}

fn nick_rest_char(c: char) -> bool {
    nick_first_char(c) || c.is_ascii_digit() || c == '-'
}

/// A valid nickname is one initial letter or special character followed by
/// up to 50 letters, digits, specials, or dashes.
pub fn valid_nickname(nick: &str) -> bool {
    let mut chars = nick.chars();
    match chars.next() {
        Some(c) if nick_first_char(c) => {}
        _ => return false,
    }
    nick.chars().count() <= 51 && chars.all(nick_rest_char)
}

/// A valid channel name starts with `& # + !` followed by up to 50 bytes,
/// none of which may be NUL, BEL, LF, CR, space, comma, or colon.
pub fn valid_channel_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some('&' | '#' | '+' | '!') => {}
        _ => return false,
    }
    let rest = &name[1..];
    rest.len() <= 50
        && !rest
            .chars()
            .any(|c| matches!(c, '\0' | '\x07' | '\n' | '\r' | ' ' | ',' | ':'))
}

/// Clamp an outgoing line (already terminated with CRLF) to [`MAX_LINE`]
/// bytes, keeping the terminator.
pub fn clamp_line(line: &mut String) {
    if line.len() <= MAX_LINE {
        return;
    }
    let mut cut = MAX_LINE - 2;
    while !line.is_char_boundary(cut) {
        cut -= 1;
    }
    line.truncate(cut);
    line.push_str("\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_command_only() {
        let msg = Message::parse("QUIT").unwrap();
        assert_eq!(msg.command, "QUIT");
        assert!(msg.params.is_empty());
    }

    #[test]
    fn parse_head_and_trailing() {
        let msg = Message::parse("CMD a b :c d e\r\n").unwrap();
        assert_eq!(msg.command, "CMD");
        assert_eq!(msg.params, vec!["a", "b", "c d e"]);
    }

    #[test]
    fn parse_bare_lf() {
        let msg = Message::parse("NICK alice\n").unwrap();
        assert_eq!(msg.command, "NICK");
        assert_eq!(msg.params, vec!["alice"]);
    }

    #[test]
    fn parse_immediate_trailing() {
        let msg = Message::parse("QUIT :gone for lunch").unwrap();
        assert_eq!(msg.params, vec!["gone for lunch"]);
    }

    #[test]
    fn parse_user_command() {
        let msg = Message::parse("USER alice 0 * :Alice A").unwrap();
        assert_eq!(msg.params, vec!["alice", "0", "*", "Alice A"]);
    }

    #[test]
    fn parse_uppercases_command() {
        let msg = Message::parse("privmsg #test :hello").unwrap();
        assert_eq!(msg.command, "PRIVMSG");
    }

    #[test]
    fn parse_empty_line() {
        assert_eq!(Message::parse(""), None);
        assert_eq!(Message::parse("\r\n"), None);
    }

    #[test]
    fn fold_scandinavian() {
        assert_eq!(irc_lower("AB[]\\^"), "ab{}|~");
        assert_eq!(irc_lower("#Chan"), "#chan");
        assert_eq!(irc_lower("already"), "already");
    }

    #[test]
    fn safe_stem_transform() {
        assert_eq!(safe_file_stem("#a_b/c"), "#a__b_c");
        assert_eq!(safe_file_stem("#Room"), "#room");
    }

    #[test]
    fn nickname_validation() {
        assert!(valid_nickname("alice"));
        assert!(valid_nickname("[weird]`nick^"));
        assert!(valid_nickname("a-b-c2"));
        assert!(!valid_nickname(""));
        assert!(!valid_nickname("1abc"));
        assert!(!valid_nickname("-abc"));
        assert!(!valid_nickname("with space"));
        assert!(!valid_nickname(&"a".repeat(52)));
        assert!(valid_nickname(&"a".repeat(51)));
    }

    #[test]
    fn channel_name_validation() {
        assert!(valid_channel_name("#room"));
        assert!(valid_channel_name("&local"));
        assert!(valid_channel_name("+x"));
        assert!(valid_channel_name("!y"));
        assert!(valid_channel_name("#"));
        assert!(!valid_channel_name("room"));
        assert!(!valid_channel_name("#with space"));
        assert!(!valid_channel_name("#a,b"));
        assert!(!valid_channel_name("#a:b"));
        assert!(!valid_channel_name(&format!("#{}", "a".repeat(51))));
        assert!(valid_channel_name(&format!("#{}", "a".repeat(50))));
    }

    #[test]
    fn clamp_keeps_short_lines() {
        let mut line = ":server 001 alice :Hi, welcome to IRC\r\n".to_string();
        let before = line.clone();
        clamp_line(&mut line);
        assert_eq!(line, before);
    }

    #[test]
    fn clamp_caps_long_lines() {
        let mut line = format!(":server PRIVMSG #x :{}\r\n", "y".repeat(600));
        clamp_line(&mut line);
        assert_eq!(line.len(), MAX_LINE);
        assert!(line.ends_with("\r\n"));
    }
}
