//! Job-file command parser.
//!
//! Line oriented: one command per line. Malformed lines become
//! [`Command::Invalid`] so the runner can report them and keep going -
//! a bad command never aborts the rest of the file.

use pipekv_proto::{MAX_STRING_SIZE, MAX_WRITE_SIZE};
use std::io::BufRead;

/// Help text printed for the HELP command.
pub const HELP_TEXT: &str = "Available commands:\n  \
WRITE [(key,value),(key2,value2),...]\n  \
READ [key,key2,...]\n  \
DELETE [key,key2,...]\n  \
SHOW\n  \
WAIT <delay_ms>\n  \
BACKUP\n  \
HELP\n";

/// One parsed job-file command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Write(Vec<(String, String)>),
    Read(Vec<String>),
    Delete(Vec<String>),
    Show,
    /// Delay in milliseconds.
    Wait(u64),
    Backup,
    Help,
    Invalid,
}

/// Iterator over the commands of one job file. Blank lines are skipped;
/// iteration ends at end of file.
pub struct JobParser<R> {
    input: R,
    line: String,
}

impl<R: BufRead> JobParser<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            line: String::new(),
        }
    }
}

impl<R: BufRead> Iterator for JobParser<R> {
    type Item = Command;

    fn next(&mut self) -> Option<Command> {
        loop {
            self.line.clear();
            match self.input.read_line(&mut self.line) {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
            let line = self.line.trim();
            if !line.is_empty() {
                return Some(parse_line(line));
            }
        }
    }
}

fn parse_line(line: &str) -> Command {
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    match word {
        "WRITE" => parse_pairs(rest).map_or(Command::Invalid, Command::Write),
        "READ" => parse_keys(rest).map_or(Command::Invalid, Command::Read),
        "DELETE" => parse_keys(rest).map_or(Command::Invalid, Command::Delete),
        "SHOW" if rest.is_empty() => Command::Show,
        "WAIT" => rest.parse().map_or(Command::Invalid, Command::Wait),
        "BACKUP" if rest.is_empty() => Command::Backup,
        "HELP" if rest.is_empty() => Command::Help,
        _ => Command::Invalid,
    }
}

/// A key or value: non-empty, bounded, and free of the list syntax.
fn valid_string(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_STRING_SIZE
        && s.is_ascii()
        && !s.contains(['(', ')', '[', ']', ','])
}

/// Parses `[(k,v),(k2,v2),...]`.
fn parse_pairs(list: &str) -> Option<Vec<(String, String)>> {
    let inner = list.strip_prefix("[(")?.strip_suffix(")]")?;
    let mut pairs = Vec::new();
    for tuple in inner.split("),(") {
        let (key, value) = tuple.split_once(',')?;
        if !valid_string(key) || !valid_string(value) {
            return None;
        }
        pairs.push((key.to_owned(), value.to_owned()));
    }
    (1..=MAX_WRITE_SIZE).contains(&pairs.len()).then_some(pairs)
}

/// Parses `[k,k2,...]`.
fn parse_keys(list: &str) -> Option<Vec<String>> {
    let inner = list.strip_prefix('[')?.strip_suffix(']')?;
    let mut keys = Vec::new();
    for key in inner.split(',') {
        if !valid_string(key) {
            return None;
        }
        keys.push(key.to_owned());
    }
    (1..=MAX_WRITE_SIZE).contains(&keys.len()).then_some(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse_all(input: &str) -> Vec<Command> {
        JobParser::new(Cursor::new(input)).collect()
    }

    #[test]
    fn parses_each_command_kind() {
        let commands = parse_all(
            "WRITE [(apple,red),(banana,yellow)]\n\
             READ [apple,banana]\n\
             DELETE [apple]\n\
             SHOW\n\
             WAIT 100\n\
             BACKUP\n\
             HELP\n",
        );
        assert_eq!(
            commands,
            [
                Command::Write(vec![
                    ("apple".into(), "red".into()),
                    ("banana".into(), "yellow".into()),
                ]),
                Command::Read(vec!["apple".into(), "banana".into()]),
                Command::Delete(vec!["apple".into()]),
                Command::Show,
                Command::Wait(100),
                Command::Backup,
                Command::Help,
            ]
        );
    }

    #[test]
    fn blank_lines_are_skipped() {
        let commands = parse_all("\nSHOW\n\n\nBACKUP\n");
        assert_eq!(commands, [Command::Show, Command::Backup]);
    }

    #[test]
    fn malformed_lines_parse_as_invalid() {
        for line in [
            "WRITE",
            "WRITE [(apple)]",
            "WRITE [(apple,red]",
            "WRITE [()]",
            "READ []",
            "READ apple",
            "WAIT soon",
            "SHOW me",
            "FROB [x]",
        ] {
            assert_eq!(parse_all(line), [Command::Invalid], "line: {line:?}");
        }
    }

    #[test]
    fn oversize_keys_are_rejected() {
        let long = "k".repeat(MAX_STRING_SIZE + 1);
        assert_eq!(parse_all(&format!("READ [{long}]")), [Command::Invalid]);

        let fits = "k".repeat(MAX_STRING_SIZE);
        assert_eq!(
            parse_all(&format!("READ [{fits}]")),
            [Command::Read(vec![fits])]
        );
    }

    #[test]
    fn an_invalid_line_does_not_stop_iteration() {
        let commands = parse_all("READ [apple]\nGARBAGE\nSHOW\n");
        assert_eq!(
            commands,
            [
                Command::Read(vec!["apple".into()]),
                Command::Invalid,
                Command::Show,
            ]
        );
    }
}
