//! Parsing for the client's interactive commands.

/// One line of client input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Subscribe(String),
    Unsubscribe(String),
    Disconnect,
    /// Delay in milliseconds.
    Delay(u64),
    Empty,
    Invalid,
}

/// Parses one input line: `SUBSCRIBE [key]`, `UNSUBSCRIBE [key]`,
/// `DISCONNECT`, `DELAY <ms>`.
pub fn parse_client_command(line: &str) -> ClientCommand {
    let line = line.trim();
    if line.is_empty() {
        return ClientCommand::Empty;
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    match word {
        "SUBSCRIBE" => parse_key(rest).map_or(ClientCommand::Invalid, ClientCommand::Subscribe),
        "UNSUBSCRIBE" => parse_key(rest).map_or(ClientCommand::Invalid, ClientCommand::Unsubscribe),
        "DISCONNECT" if rest.is_empty() => ClientCommand::Disconnect,
        "DELAY" => rest.parse().map_or(ClientCommand::Invalid, ClientCommand::Delay),
        _ => ClientCommand::Invalid,
    }
}

/// A single bracketed key: `[key]`.
fn parse_key(list: &str) -> Option<String> {
    let key = list.strip_prefix('[')?.strip_suffix(']')?;
    let ok = !key.is_empty()
        && key.len() <= pipekv_proto::MAX_STRING_SIZE
        && key.is_ascii()
        && !key.contains(['(', ')', '[', ']', ',']);
    ok.then(|| key.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_command() {
        assert_eq!(
            parse_client_command("SUBSCRIBE [apple]"),
            ClientCommand::Subscribe("apple".into())
        );
        assert_eq!(
            parse_client_command("UNSUBSCRIBE [apple]"),
            ClientCommand::Unsubscribe("apple".into())
        );
        assert_eq!(parse_client_command("DISCONNECT"), ClientCommand::Disconnect);
        assert_eq!(parse_client_command("DELAY 250"), ClientCommand::Delay(250));
        assert_eq!(parse_client_command("  "), ClientCommand::Empty);
    }

    #[test]
    fn malformed_lines_are_invalid() {
        for line in [
            "SUBSCRIBE apple",
            "SUBSCRIBE []",
            "SUBSCRIBE [a,b]",
            "DELAY later",
            "DISCONNECT now",
            "FROB",
        ] {
            assert_eq!(parse_client_command(line), ClientCommand::Invalid, "{line:?}");
        }
    }
}
