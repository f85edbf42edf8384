//! Ordered line classifier
//!
//! Turns one normalized line of subprocess output into a [`ProtocolEvent`].
//! Matchers run top to bottom and the first hit wins, so structured control
//! tokens always pre-empt the `<author>: <text>` chat fallback:
//!
//! 1. login success / login failure / session invalidated
//! 2. `STATUS_UPDATE::<user>::<status>` and `USER_LIST::<json>`
//! 3. join / leave notices, voice joined / voice left confirmations
//! 4. `ERROR::<text>`, `SERVER_SHUTDOWN::<text>`, server startup line
//! 5. known noisy client chatter (suppressed)
//! 6. chat fallback, then `Unclassified`
//!
//! Server output only goes through the startup matcher. Its log lines carry
//! timestamps full of colons and are never chat.

use lazy_static::lazy_static;
use regex::Regex;

use crate::events::ProtocolEvent;
use crate::types::{PresenceStatus, Role, RosterRecord};

const PROMPT: &str = "> ";

const LOGIN_SUCCESS_TOKEN: &str = "LOGIN_SUCCESS::";
const LOGIN_FAILURE_TOKEN: &str = "LOGIN_FAILURE::";
const SESSION_INVALIDATED_TOKEN: &str = "ERROR::SESSION_INVALIDATED";
const STATUS_UPDATE_TOKEN: &str = "STATUS_UPDATE::";
const USER_LIST_TOKEN: &str = "USER_LIST::";
const ERROR_TOKEN: &str = "ERROR::";
const SERVER_SHUTDOWN_TOKEN: &str = "SERVER_SHUTDOWN::";

const LOGIN_SUCCESS_PHRASES: &[&str] = &["Успешный вход как ", "Logged in as "];
const LOGIN_FAILURE_PHRASES: &[&str] = &["Ошибка входа: ", "Login failed: "];
const SESSION_INVALIDATED_PHRASES: &[&str] = &["Ваша сессия была завершена", "Session invalidated"];
const VOICE_JOINED_PHRASES: &[&str] = &["Вы подключились к голосовому чату", "Joined voice chat"];
const VOICE_LEFT_PHRASES: &[&str] = &["Вы отключились от голосового чата", "Left voice chat"];
const STARTUP_PHRASES: &[&str] = &["Сервер запущен на порту", "Server listening on"];

/// Client chatter that carries no session meaning
const NOISY_PREFIXES: &[&str] = &[
    "Доступные команды",
    "/voice - ",
    "/leave - ",
    "/exit - ",
    "Любой другой текст будет отправлен",
    "Попытка подключения к серверу",
    "Голосовое соединение установлено",
    "Инициализация аудиопотоков",
    "Используется устройство",
    "✅ Аудиопотоки инициализированы",
    "Вы уже подключены к голосовому чату",
    "Вы не подключены к голосовому чату",
];

lazy_static! {
    static ref DOTTED_QUAD: Regex =
        Regex::new(r"\b(\d{1,3}(?:\.\d{1,3}){3})(?::(\d+))?").unwrap();
    static ref TRAILING_PORT: Regex = Regex::new(r":(\d{1,5})\b").unwrap();
    // Usernames never carry brackets or colons, so chat lines can't pose as notices
    static ref JOIN_NOTICE: Regex = Regex::new(r"^([^\s\[\]:]+) joined the chat$").unwrap();
    static ref LEAVE_NOTICE: Regex = Regex::new(r"^([^\s\[\]:]+) left the chat$").unwrap();
}

/// A line that matched a control token but whose payload could not be decoded
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed USER_LIST payload: {source}")]
    MalformedUserList {
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed STATUS_UPDATE line: {0}")]
    MalformedStatusUpdate(String),

    #[error("unknown presence status: {0}")]
    UnknownStatus(String),
}

/// Strip the carriage return, any leading `"> "` prompts and surrounding whitespace
pub fn normalize_line(raw: &str) -> &str {
    let mut line = raw.trim_end_matches('\r').trim();
    while let Some(rest) = line.strip_prefix(PROMPT) {
        line = rest.trim_start();
    }
    if line == ">" {
        return "";
    }
    line
}

/// Classify one line of output from a process playing `role`
///
/// Returns `Ok(None)` for lines that are suppressed (blank or known noise).
pub fn classify(role: Role, raw: &str) -> Result<Option<ProtocolEvent>, DecodeError> {
    let line = normalize_line(raw);
    if line.is_empty() {
        return Ok(None);
    }

    match role {
        Role::Server => Ok(Some(classify_server(line))),
        Role::Client => classify_client(line),
    }
}

fn classify_server(line: &str) -> ProtocolEvent {
    match server_started(line) {
        Some(event) => event,
        None => ProtocolEvent::Unclassified {
            text: line.to_string(),
        },
    }
}

fn classify_client(line: &str) -> Result<Option<ProtocolEvent>, DecodeError> {
    if let Some(event) = login_success(line) {
        return Ok(Some(event));
    }
    if let Some(event) = login_failure(line) {
        return Ok(Some(event));
    }
    if line.starts_with(SESSION_INVALIDATED_TOKEN)
        || starts_with_any(line, SESSION_INVALIDATED_PHRASES)
    {
        return Ok(Some(ProtocolEvent::SessionInvalidated {
            reason: line.to_string(),
        }));
    }
    if let Some(rest) = line.strip_prefix(STATUS_UPDATE_TOKEN) {
        return status_update(rest).map(Some);
    }
    if let Some(rest) = line.strip_prefix(USER_LIST_TOKEN) {
        return user_list(rest).map(Some);
    }
    if let Some(caps) = JOIN_NOTICE.captures(line) {
        return Ok(Some(ProtocolEvent::JoinNotice {
            user: caps[1].trim().to_string(),
        }));
    }
    if let Some(caps) = LEAVE_NOTICE.captures(line) {
        return Ok(Some(ProtocolEvent::LeaveNotice {
            user: caps[1].trim().to_string(),
        }));
    }
    if starts_with_any(line, VOICE_JOINED_PHRASES) {
        return Ok(Some(ProtocolEvent::VoiceJoined));
    }
    if starts_with_any(line, VOICE_LEFT_PHRASES) {
        return Ok(Some(ProtocolEvent::VoiceLeft));
    }
    if let Some(rest) = line.strip_prefix(ERROR_TOKEN) {
        return Ok(Some(ProtocolEvent::GenericError {
            text: rest.trim().to_string(),
        }));
    }
    if let Some(rest) = line.strip_prefix(SERVER_SHUTDOWN_TOKEN) {
        return Ok(Some(ProtocolEvent::ServerShutdown {
            reason: rest.trim().to_string(),
        }));
    }
    if let Some(event) = server_started(line) {
        return Ok(Some(event));
    }
    if starts_with_any(line, NOISY_PREFIXES) {
        return Ok(None);
    }
    if let Some(event) = chat_line(line) {
        return Ok(Some(event));
    }

    Ok(Some(ProtocolEvent::Unclassified {
        text: line.to_string(),
    }))
}

fn starts_with_any(line: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|p| line.starts_with(p))
}

fn login_success(line: &str) -> Option<ProtocolEvent> {
    let user = if let Some(rest) = line.strip_prefix(LOGIN_SUCCESS_TOKEN) {
        // LOGIN_SUCCESS::<token>::<user>
        rest.rsplit("::").next().unwrap_or(rest)
    } else {
        LOGIN_SUCCESS_PHRASES
            .iter()
            .find_map(|p| line.strip_prefix(p))
            .map(|rest| rest.strip_suffix('.').unwrap_or(rest))?
    };

    let user = user.trim();
    if user.is_empty() {
        return None;
    }
    Some(ProtocolEvent::LoginSuccess {
        user: user.to_string(),
    })
}

fn login_failure(line: &str) -> Option<ProtocolEvent> {
    let reason = line
        .strip_prefix(LOGIN_FAILURE_TOKEN)
        .or_else(|| LOGIN_FAILURE_PHRASES.iter().find_map(|p| line.strip_prefix(p)))?;

    Some(ProtocolEvent::LoginFailure {
        reason: reason.trim().to_string(),
    })
}

fn status_update(rest: &str) -> Result<ProtocolEvent, DecodeError> {
    let mut parts = rest.splitn(2, "::");
    let user = parts.next().map(str::trim).unwrap_or_default();
    let status = parts.next().map(str::trim).unwrap_or_default();

    if user.is_empty() || status.is_empty() {
        return Err(DecodeError::MalformedStatusUpdate(format!(
            "{}{}",
            STATUS_UPDATE_TOKEN, rest
        )));
    }

    let status = status
        .parse::<PresenceStatus>()
        .map_err(DecodeError::UnknownStatus)?;

    Ok(ProtocolEvent::StatusUpdate {
        user: user.to_string(),
        status,
    })
}

fn user_list(rest: &str) -> Result<ProtocolEvent, DecodeError> {
    let payload = rest.trim();
    let list = if payload == "null" {
        Vec::new()
    } else {
        serde_json::from_str::<Vec<RosterRecord>>(payload)
            .map_err(|source| DecodeError::MalformedUserList { source })?
    };
    Ok(ProtocolEvent::UserListSnapshot { list })
}

fn server_started(line: &str) -> Option<ProtocolEvent> {
    if !STARTUP_PHRASES.iter().any(|p| line.contains(p)) {
        return None;
    }

    let address = if let Some(caps) = DOTTED_QUAD.captures(line) {
        match caps.get(2) {
            Some(port) => format!("{}:{}", &caps[1], port.as_str()),
            None => caps[1].to_string(),
        }
    } else if let Some(caps) = TRAILING_PORT.captures_iter(line).last() {
        format!("0.0.0.0:{}", &caps[1])
    } else {
        "0.0.0.0".to_string()
    };

    Some(ProtocolEvent::ServerStarted { address })
}

fn chat_line(line: &str) -> Option<ProtocolEvent> {
    let (author, text) = line.split_once(':')?;
    let author = author.trim();
    let text = text.trim();

    let author = match author.strip_prefix('[').and_then(|a| a.strip_suffix(']')) {
        Some(inner) => inner.trim(),
        None if author.chars().any(char::is_whitespace) => return None,
        None => author,
    };

    if author.is_empty() || text.is_empty() {
        return None;
    }
    Some(ProtocolEvent::ChatLine {
        author: author.to_string(),
        text: text.to_string(),
    })
}
