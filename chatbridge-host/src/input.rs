//! Parsing of stdin lines into intents
//!
//! Lines starting with `:` are front-end commands; anything else is chat.

use chatbridge_host::Intent;

pub const USAGE: &str = "\
commands:
  :server start|stop
  :login [address] <user> <password>
  :voice
  :exit
  :quit
  :help
anything else is sent as chat";

/// One parsed line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputLine {
    Intent(Intent),
    Help,
    /// Leave the front end
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown command: {0} (try :help)")]
    UnknownCommand(String),

    #[error("usage: {0}")]
    Usage(&'static str),
}

/// Parse one line; `Ok(None)` for blank input
pub fn parse_line(line: &str) -> Result<Option<InputLine>, ParseError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let Some(command) = trimmed.strip_prefix(':') else {
        return Ok(Some(InputLine::Intent(Intent::SendMessage(
            line.trim_end().to_string(),
        ))));
    };

    let parts: Vec<&str> = command.split_whitespace().collect();
    let intent = match parts.as_slice() {
        ["server", "start"] => Intent::StartServer,
        ["server", "stop"] => Intent::StopServer,
        ["server", ..] => return Err(ParseError::Usage(":server start|stop")),
        ["login", user, password] => login("", user, password),
        ["login", address, user, password] => login(address, user, password),
        ["login", ..] => return Err(ParseError::Usage(":login [address] <user> <password>")),
        ["voice"] => Intent::ToggleVoice,
        ["exit"] => Intent::Exit,
        ["quit"] => return Ok(Some(InputLine::Quit)),
        ["help"] => return Ok(Some(InputLine::Help)),
        _ => return Err(ParseError::UnknownCommand(trimmed.to_string())),
    };
    Ok(Some(InputLine::Intent(intent)))
}

fn login(address: &str, user: &str, password: &str) -> Intent {
    Intent::Login {
        address: address.to_string(),
        username: user.to_string(),
        password: password.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(line: &str) -> Intent {
        match parse_line(line) {
            Ok(Some(InputLine::Intent(intent))) => intent,
            other => panic!("expected intent for {:?}, got {:?}", line, other),
        }
    }

    #[test]
    fn test_blank() {
        assert_eq!(parse_line("   "), Ok(None));
    }

    #[test]
    fn test_chat() {
        assert_eq!(intent("hello there  "), Intent::SendMessage("hello there".into()));
        assert_eq!(intent("/voice"), Intent::SendMessage("/voice".into()));
    }

    #[test]
    fn test_server() {
        assert_eq!(intent(":server start"), Intent::StartServer);
        assert_eq!(intent(" :server  stop "), Intent::StopServer);
        assert!(matches!(parse_line(":server"), Err(ParseError::Usage(_))));
    }

    #[test]
    fn test_login() {
        assert_eq!(
            intent(":login 10.0.0.2 alice pw"),
            Intent::Login {
                address: "10.0.0.2".into(),
                username: "alice".into(),
                password: "pw".into(),
            }
        );
        assert_eq!(
            intent(":login alice pw"),
            Intent::Login {
                address: String::new(),
                username: "alice".into(),
                password: "pw".into(),
            }
        );
        assert!(matches!(parse_line(":login alice"), Err(ParseError::Usage(_))));
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(intent(":voice"), Intent::ToggleVoice);
        assert_eq!(intent(":exit"), Intent::Exit);
        assert_eq!(parse_line(":quit"), Ok(Some(InputLine::Quit)));
        assert_eq!(parse_line(":help"), Ok(Some(InputLine::Help)));
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            parse_line(":dance"),
            Err(ParseError::UnknownCommand(":dance".into()))
        );
    }
}
