//! Human-readable peer address descriptions.
//!
//! # Grammar
//!
//! Canonical form, always produced by serialization:
//!
//! ```text
//! TYPE#bandwidth#launchCommand#quoteChar#launchTimeout#hostname#port#filename
//! ```
//!
//! `quoteChar` is written as the numeric code of the character. When the
//! input contains no `#`, a shorthand is accepted instead:
//!
//! ```text
//! hostname[:token]*     token = port (starts with a digit) | TYPE
//! ```
//!
//! Only the canonical form round-trips exactly.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::error::LatticeError;

const SEPARATOR: char = '#';
const FIELD_COUNT: usize = 8;

/// Default command used to start a remote worker (`%h` host, `%c` command).
pub const DEFAULT_LAUNCH_COMMAND: &str = "ssh -n %h %c";
/// Default time a launched worker has to become reachable, in milliseconds.
pub const DEFAULT_LAUNCH_TIMEOUT_MS: u32 = 10_000;

// ── ConnectionType ───────────────────────────────────────────────

/// Transport kind used to reach a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionType {
    #[default]
    TcpIp,
    Sdp,
    /// Anonymous pipe between parent and child process.
    Pipe,
    NamedPipe,
    InfiniBand,
    Udp,
    Multicast,
    MulticastPgm,
    MulticastRsp,
}

impl ConnectionType {
    /// The token used for this type in the text grammar.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TcpIp => "TCPIP",
            Self::Sdp => "SDP",
            Self::Pipe => "ANON_PIPE",
            Self::NamedPipe => "PIPE",
            Self::InfiniBand => "IB",
            Self::Udp => "UDP",
            Self::Multicast => "MCIP",
            Self::MulticastPgm => "PGM",
            Self::MulticastRsp => "RSP",
        }
    }

    /// Returns `true` for the multicast families.
    pub fn is_multicast(&self) -> bool {
        matches!(
            self,
            Self::Multicast | Self::MulticastPgm | Self::MulticastRsp
        )
    }
}

impl FromStr for ConnectionType {
    type Err = LatticeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TCPIP" => Ok(Self::TcpIp),
            "SDP" => Ok(Self::Sdp),
            "ANON_PIPE" => Ok(Self::Pipe),
            "PIPE" => Ok(Self::NamedPipe),
            "IB" => Ok(Self::InfiniBand),
            "UDP" => Ok(Self::Udp),
            "MCIP" => Ok(Self::Multicast),
            "PGM" => Ok(Self::MulticastPgm),
            "RSP" => Ok(Self::MulticastRsp),
            other => Err(LatticeError::InvalidDescription(format!(
                "unknown connection type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── ConnectionDescription ────────────────────────────────────────

/// Describes how to reach, and if necessary launch, a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescription {
    pub connection_type: ConnectionType,
    /// Expected bandwidth in kilobytes per second (informational).
    pub bandwidth: u32,
    /// Command used to start the peer process.
    pub launch_command: String,
    /// Quote character wrapped around arguments in the launch command.
    pub launch_command_quote: char,
    /// Time the launched peer has to become reachable, in milliseconds.
    pub launch_timeout: u32,
    pub hostname: String,
    pub port: u16,
    /// Path for file-based transports (named pipes).
    pub filename: String,
}

impl Default for ConnectionDescription {
    fn default() -> Self {
        Self {
            connection_type: ConnectionType::TcpIp,
            bandwidth: 0,
            launch_command: DEFAULT_LAUNCH_COMMAND.to_string(),
            launch_command_quote: '\'',
            launch_timeout: DEFAULT_LAUNCH_TIMEOUT_MS,
            hostname: String::new(),
            port: 0,
            filename: String::new(),
        }
    }
}

impl ConnectionDescription {
    /// Description of a TCP peer at `hostname:port` with default launch
    /// parameters.
    pub fn tcp(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            ..Default::default()
        }
    }

    /// Parse `text` on top of the default description.
    pub fn parse(text: &str) -> Result<Self, LatticeError> {
        Self::default().parsed_over(text)
    }

    /// Parse `data` into `self`, consuming it.
    ///
    /// Parsing happens on a copy and is committed only on success: on
    /// failure neither `self` nor `data` is modified and the problem is
    /// logged.
    pub fn from_string(&mut self, data: &mut String) -> bool {
        match self.parsed_over(data) {
            Ok(parsed) => {
                *self = parsed;
                data.clear();
                true
            }
            Err(e) => {
                warn!("{e}");
                false
            }
        }
    }

    /// `hostname:port`, suitable for socket APIs.
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    pub fn launch_timeout_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.launch_timeout))
    }

    fn parsed_over(&self, text: &str) -> Result<Self, LatticeError> {
        if text.contains(SEPARATOR) {
            parse_canonical(text)
        } else {
            self.parse_shorthand(text)
        }
    }

    /// `hostname[:port][:TYPE]...`; fields not named keep their value.
    fn parse_shorthand(&self, text: &str) -> Result<Self, LatticeError> {
        let mut desc = self.clone();
        desc.connection_type = ConnectionType::TcpIp;

        let mut tokens = text.split(':');
        desc.hostname = tokens.next().unwrap_or_default().to_string();

        for token in tokens {
            if token.starts_with(|c: char| c.is_ascii_digit()) {
                desc.port = parse_number(token, "port")?;
            } else {
                desc.connection_type = token.parse()?;
            }
        }
        Ok(desc)
    }
}

fn parse_canonical(text: &str) -> Result<ConnectionDescription, LatticeError> {
    let fields: Vec<&str> = text.split(SEPARATOR).collect();
    let &[ty, bandwidth, command, quote, timeout, hostname, port, filename] = fields.as_slice() else {
        return Err(LatticeError::InvalidDescription(format!(
            "expected {FIELD_COUNT} '{SEPARATOR}'-separated fields, got {}: {text}",
            fields.len()
        )));
    };

    let quote_code: u32 = parse_number(quote, "quote character")?;
    let launch_command_quote = char::from_u32(quote_code).ok_or_else(|| {
        LatticeError::InvalidDescription(format!("invalid quote character code {quote_code}"))
    })?;

    Ok(ConnectionDescription {
        connection_type: ty.parse()?,
        bandwidth: parse_number(bandwidth, "bandwidth")?,
        launch_command: command.to_string(),
        launch_command_quote,
        launch_timeout: parse_number(timeout, "launch timeout")?,
        hostname: hostname.to_string(),
        port: parse_number(port, "port")?,
        filename: filename.to_string(),
    })
}

fn parse_number<T: FromStr>(field: &str, what: &str) -> Result<T, LatticeError> {
    field
        .trim()
        .parse()
        .map_err(|_| LatticeError::InvalidDescription(format!("invalid {what} '{field}'")))
}

impl FromStr for ConnectionDescription {
    type Err = LatticeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Canonical serialization.
impl fmt::Display for ConnectionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{ty}{s}{bw}{s}{cmd}{s}{quote}{s}{timeout}{s}{host}{s}{port}{s}{file}",
            s = SEPARATOR,
            ty = self.connection_type,
            bw = self.bandwidth,
            cmd = self.launch_command,
            quote = u32::from(self.launch_command_quote),
            timeout = self.launch_timeout,
            host = self.hostname,
            port = self.port,
            file = self.filename,
        )
    }
}

// ── Tests ────────────────────────────────────────────────────────
