//! Line protocol spoken between the relay and its clients.
//!
//! Every frame is a single UTF-8 line terminated by `\n`; a trailing `\r`
//! is tolerated on input. Replies borrow IRC's numeric style
//! (`<code> <NAME>: <description>`), everything else is plain text.

use tokio_util::codec::LinesCodec;

pub const DEFAULT_PORT: u16 = 25565;

/// Longest inbound line accepted, in bytes, excluding the terminator.
pub const DEFAULT_MAX_LINE_LEN: usize = 1024;

pub const ERR_NEEDMOREPARAMS: &str = "431 ERR_NEEDMOREPARAMS: Not enough parameters provided";
pub const ERR_ALREADYREGISTRED: &str = "462 ERR_ALREADYREGISTRED: Username is already registered";
pub const ERR_REREGISTER: &str = "462 ERR_ALREADYREGISTRED: You may not reregister";
pub const ERR_NOTREGISTERED: &str = "451 ERR_NOTREGISTERED: You have not registered";
pub const ERR_INPUTTOOLONG: &str = "417 ERR_INPUTTOOLONG: Input line was too long";
pub const FAREWELL: &str = "Goodbye!";
pub const SHUTDOWN_NOTICE: &str = "ERROR: Server shutting down";

const REGISTER_COMMAND: &str = "USER";
const QUIT_COMMAND: &str = "QUIT";

/// Fields carried by a `USER` command.
///
/// Fields are kept as received; an absent field is an empty string so the
/// registry can report exactly which one is missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
    pub username: String,
    pub hostname: String,
    pub servername: String,
    pub realname: String,
}

impl Registration {
    pub fn new(
        username: impl Into<String>,
        hostname: impl Into<String>,
        servername: impl Into<String>,
        realname: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            hostname: hostname.into(),
            servername: servername.into(),
            realname: realname.into(),
        }
    }

    /// Name of the first empty field, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        [
            ("username", &self.username),
            ("hostname", &self.hostname),
            ("servername", &self.servername),
            ("realname", &self.realname),
        ]
        .into_iter()
        .find(|(_, value)| value.is_empty())
        .map(|(name, _)| name)
    }

    /// Render the registration as the line a client sends.
    pub fn to_line(&self) -> String {
        format!(
            "{REGISTER_COMMAND} {} {} {} {}",
            self.username, self.hostname, self.servername, self.realname
        )
    }
}

/// Parse a `USER` command.
///
/// Returns `None` when the line is some other command. The real name is
/// the remainder of the line, so it may contain spaces; a leading `:` is
/// dropped the way IRC clients send it.
pub fn parse_registration(line: &str) -> Option<Registration> {
    let line = line.trim();
    let (command, rest) = split_token(line);
    if !command.eq_ignore_ascii_case(REGISTER_COMMAND) {
        return None;
    }

    let (username, rest) = split_token(rest);
    let (hostname, rest) = split_token(rest);
    let (servername, rest) = split_token(rest);
    let realname = rest.strip_prefix(':').unwrap_or(rest).trim();

    Some(Registration::new(username, hostname, servername, realname))
}

/// True when `line` starts with the quit keyword, in any case.
///
/// Only the first four bytes are compared, so `Quitting` quits too.
pub fn is_quit(line: &str) -> bool {
    line.as_bytes()
        .get(..QUIT_COMMAND.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(QUIT_COMMAND.as_bytes()))
}

pub fn welcome(username: &str) -> String {
    format!("001 RPL_WELCOME: Welcome to the relay, {username}")
}

pub fn join_notice(nickname: &str) -> String {
    format!("New client joined: {nickname}")
}

pub fn departure_notice(nickname: &str) -> String {
    format!("Client disconnected: {nickname}")
}

pub fn relayed_chat(nickname: &str, text: &str) -> String {
    format!("Received from {nickname}: {text}")
}

/// True for the replies that end a registration attempt.
pub fn is_registration_error(line: &str) -> bool {
    line.starts_with("431 ") || line.starts_with("462 ")
}

/// Codec for lines read from clients, capped at `max_line_len` bytes.
pub fn line_codec(max_line_len: usize) -> LinesCodec {
    LinesCodec::new_with_max_length(max_line_len.max(1))
}

fn split_token(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.find(char::is_whitespace) {
        Some(end) => (&input[..end], input[end..].trim_start()),
        None => (input, ""),
    }
}
