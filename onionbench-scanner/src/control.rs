//! Minimal Tor control-port client.
//!
//! Speaks just enough of Tor's control protocol to
//! authenticate, list streams and circuits, and resolve a relay fingerprint
//! to its address through the relay's network status entry.

use crate::error::{Result, ScanError};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info};

pub const DEFAULT_CONTROL_PORT: u16 = 9151;
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

/// Stream state as reported by `GETINFO stream-status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    New,
    NewResolve,
    Remap,
    SentConnect,
    SentResolve,
    Succeeded,
    Failed,
    Closed,
    Detached,
    Other(String),
}

impl StreamStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "NEW" => StreamStatus::New,
            "NEWRESOLVE" => StreamStatus::NewResolve,
            "REMAP" => StreamStatus::Remap,
            "SENTCONNECT" => StreamStatus::SentConnect,
            "SENTRESOLVE" => StreamStatus::SentResolve,
            "SUCCEEDED" => StreamStatus::Succeeded,
            "FAILED" => StreamStatus::Failed,
            "CLOSED" => StreamStatus::Closed,
            "DETACHED" => StreamStatus::Detached,
            other => StreamStatus::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub status: StreamStatus,
    pub circuit_id: String,
    /// `host:port` the stream connects to
    pub target: String,
}

/// One hop of a circuit path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathHop {
    pub fingerprint: String,
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitEntry {
    pub id: String,
    pub status: String,
    pub path: Vec<PathHop>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlReply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl ControlReply {
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.code)
    }

    fn into_result(self) -> Result<Self> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(ScanError::ControlError {
                code: self.code,
                message: self.lines.join(" "),
            })
        }
    }
}

pub struct TorController {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    command_timeout: Duration,
}

impl TorController {
    /// Connect to a control port on localhost.
    pub async fn connect_port(port: u16) -> Result<Self> {
        Self::connect(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)).await
    }

    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = tokio::time::timeout(Duration::from_secs(5), TcpStream::connect(addr))
            .await
            .map_err(|_| ScanError::timeout(format!("connecting to control port {}", addr), Duration::from_secs(5)))??;

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            command_timeout: DEFAULT_CONTROL_TIMEOUT,
        })
    }

    /// Upper bound for one command and its complete reply
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Authenticate with `password`, or fall back to whatever
    /// `PROTOCOLINFO` offers (null or cookie authentication).
    pub async fn authenticate(&mut self, password: Option<&str>) -> Result<()> {
        let command = match password {
            Some(password) => format!("AUTHENTICATE {}", quote(password)),
            None => {
                let info = self.protocol_info().await?;
                if info.methods.iter().any(|m| m == "NULL") {
                    "AUTHENTICATE".to_string()
                } else if info.methods.iter().any(|m| m == "COOKIE")
                    && let Some(cookie_file) = info.cookie_file
                {
                    let cookie = tokio::fs::read(&cookie_file).await?;
                    format!("AUTHENTICATE {}", hex::encode(cookie))
                } else {
                    "AUTHENTICATE".to_string()
                }
            }
        };

        self.command(&command).await?;
        info!("Authenticated to Tor control port");
        Ok(())
    }

    pub async fn protocol_info(&mut self) -> Result<ProtocolInfo> {
        let reply = self.command("PROTOCOLINFO 1").await?;
        Ok(parse_protocol_info(&reply.lines))
    }

    /// Send one command and read its complete reply. Non-2xx replies are
    /// returned as [`ScanError::ControlError`]; a reply that does not finish
    /// within the command timeout as [`ScanError::Timeout`].
    pub async fn command(&mut self, command: &str) -> Result<ControlReply> {
        let verb = command.split_whitespace().next().unwrap_or_default().to_string();
        debug!("control> {}", if verb == "AUTHENTICATE" { verb.as_str() } else { command });

        let limit = self.command_timeout;
        tokio::time::timeout(limit, self.exchange(command))
            .await
            .map_err(|_| ScanError::timeout(format!("control command {}", verb), limit))??
            .into_result()
    }

    async fn exchange(&mut self, command: &str) -> Result<ControlReply> {
        self.writer.write_all(command.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;

        self.read_reply().await
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line).await?;
        if read == 0 {
            return Err(ScanError::IoError(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "control connection closed",
            )));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn read_reply(&mut self) -> Result<ControlReply> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line.len() < 4 {
                return Err(ScanError::ParseError(format!("short control reply line '{}'", line)));
            }
            let code: u16 = line
                .get(..3)
                .and_then(|c| c.parse().ok())
                .ok_or_else(|| ScanError::ParseError(format!("bad status code in '{}'", line)))?;
            let text = line
                .get(4..)
                .ok_or_else(|| ScanError::ParseError(format!("bad separator in '{}'", line)))?
                .to_string();

            match line.as_bytes()[3] {
                b'-' => lines.push(text),
                b'+' => {
                    let mut data = vec![text];
                    loop {
                        let data_line = self.read_line().await?;
                        if data_line == "." {
                            break;
                        }
                        data.push(data_line.strip_prefix('.').map(str::to_string).unwrap_or(data_line));
                    }
                    lines.push(data.join("\n"));
                }
                b' ' => {
                    lines.push(text);
                    return Ok(ControlReply { code, lines });
                }
                other => {
                    return Err(ScanError::ParseError(format!(
                        "unexpected separator '{}' in control reply",
                        other as char
                    )));
                }
            }
        }
    }

    /// `GETINFO <key>`, returning the value (multi-line values joined by `\n`).
    pub async fn get_info(&mut self, key: &str) -> Result<String> {
        let reply = self.command(&format!("GETINFO {}", key)).await?;
        let prefix = format!("{}=", key);
        reply
            .lines
            .iter()
            .find_map(|line| line.strip_prefix(&prefix))
            .map(|value| value.trim_start_matches('\n').to_string())
            .ok_or_else(|| ScanError::ParseError(format!("no value for GETINFO {}", key)))
    }

    pub async fn streams(&mut self) -> Result<Vec<StreamEntry>> {
        let value = self.get_info("stream-status").await?;
        Ok(parse_stream_status(&value))
    }

    pub async fn circuits(&mut self) -> Result<Vec<CircuitEntry>> {
        let value = self.get_info("circuit-status").await?;
        Ok(parse_circuit_status(&value))
    }

    pub async fn circuit(&mut self, circuit_id: &str) -> Result<Option<CircuitEntry>> {
        Ok(self
            .circuits()
            .await?
            .into_iter()
            .find(|c| c.id == circuit_id))
    }

    /// Address the relay `fingerprint` advertises in its network status entry.
    pub async fn relay_address(&mut self, fingerprint: &str) -> Result<IpAddr> {
        let fingerprint = fingerprint.trim_start_matches('$');
        let value = self.get_info(&format!("ns/id/{}", fingerprint)).await?;
        parse_router_status_address(&value)
    }

    /// Send `QUIT` and drop the connection.
    pub async fn close(mut self) -> Result<()> {
        self.writer.write_all(b"QUIT\r\n").await?;
        self.writer.flush().await?;
        // Tor answers "250 closing connection"; the reply is informational
        let _ = tokio::time::timeout(self.command_timeout, self.read_reply()).await;
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolInfo {
    pub methods: Vec<String>,
    pub cookie_file: Option<PathBuf>,
}

fn parse_protocol_info(lines: &[String]) -> ProtocolInfo {
    let mut info = ProtocolInfo::default();
    for line in lines {
        let Some(auth) = line.strip_prefix("AUTH ") else {
            continue;
        };
        if let Some(rest) = auth.split_whitespace().find_map(|t| t.strip_prefix("METHODS=")) {
            info.methods = rest.split(',').map(str::to_string).collect();
        }
        if let Some(start) = auth.find("COOKIEFILE=\"") {
            let quoted = &auth[start + "COOKIEFILE=\"".len()..];
            info.cookie_file = Some(PathBuf::from(unquote_until_close(quoted)));
        }
    }
    info
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn unquote_until_close(s: &str) -> String {
    let mut out = String::new();
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '"' => break,
            c => out.push(c),
        }
    }
    out
}

/// Parse a `stream-status` value: `StreamID SP StreamStatus SP CircuitID SP Target`.
pub fn parse_stream_status(value: &str) -> Vec<StreamEntry> {
    value
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let id = parts.next()?;
            let status = parts.next()?;
            let circuit_id = parts.next()?;
            let target = parts.next()?;
            Some(StreamEntry {
                id: id.to_string(),
                status: StreamStatus::parse(status),
                circuit_id: circuit_id.to_string(),
                target: target.to_string(),
            })
        })
        .collect()
}

/// Parse a `circuit-status` value: `CircuitID SP CircStatus [SP Path] [SP Key=Value...]`.
pub fn parse_circuit_status(value: &str) -> Vec<CircuitEntry> {
    value
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let id = parts.next()?.to_string();
            let status = parts.next()?.to_string();
            let path = parts
                .next()
                .filter(|token| token.starts_with('$') || !token.contains('='))
                .map(parse_path)
                .unwrap_or_default();
            Some(CircuitEntry { id, status, path })
        })
        .collect()
}

fn parse_path(token: &str) -> Vec<PathHop> {
    token
        .split(',')
        .filter(|hop| !hop.is_empty())
        .map(|hop| match hop.strip_prefix('$') {
            Some(long_name) => {
                let mut split = long_name.splitn(2, ['~', '=']);
                let fingerprint = split.next().unwrap_or_default().to_string();
                let nickname = split.next().map(str::to_string);
                PathHop {
                    fingerprint,
                    nickname,
                }
            }
            None => PathHop {
                fingerprint: String::new(),
                nickname: Some(hop.to_string()),
            },
        })
        .collect()
}

/// Extract the IP from the `r` line of a router status entry:
/// `r nickname identity digest date time IP ORPort DirPort`.
pub fn parse_router_status_address(entry: &str) -> Result<IpAddr> {
    let r_line = entry
        .lines()
        .find(|line| line.starts_with("r "))
        .ok_or_else(|| ScanError::ParseError("router status has no r line".to_string()))?;

    let parts: Vec<&str> = r_line.split_whitespace().collect();
    if parts.len() < 8 {
        return Err(ScanError::ParseError(format!("invalid r line '{}'", r_line)));
    }

    parts[6]
        .parse()
        .map_err(|_| ScanError::ParseError(format!("invalid relay address '{}'", parts[6])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const FP1: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
    const FP2: &str = "BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB";

    #[test]
    fn test_parse_stream_status() {
        let value = "12 SUCCEEDED 5 www.example.com:443\n13 NEW 0 other.onion:80\nbroken";
        let streams = parse_stream_status(value);
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].id, "12");
        assert_eq!(streams[0].status, StreamStatus::Succeeded);
        assert_eq!(streams[0].circuit_id, "5");
        assert_eq!(streams[0].target, "www.example.com:443");
        assert_eq!(streams[1].status, StreamStatus::New);
    }

    #[test]
    fn test_parse_circuit_status() {
        let value = format!(
            "5 BUILT ${}~alpha,${}=beta BUILD_FLAGS=IS_INTERNAL PURPOSE=HS_CLIENT_REND\n6 LAUNCHED BUILD_FLAGS=NEED_CAPACITY",
            FP1, FP2
        );
        let circuits = parse_circuit_status(&value);
        assert_eq!(circuits.len(), 2);
        assert_eq!(circuits[0].id, "5");
        assert_eq!(circuits[0].status, "BUILT");
        assert_eq!(
            circuits[0].path,
            vec![
                PathHop { fingerprint: FP1.to_string(), nickname: Some("alpha".to_string()) },
                PathHop { fingerprint: FP2.to_string(), nickname: Some("beta".to_string()) },
            ]
        );
        assert!(circuits[1].path.is_empty());
    }

    #[test]
    fn test_parse_router_status_address() {
        let entry = format!(
            "r alpha {} digest 2025-01-01 12:00:00 192.0.2.10 9001 0\ns Fast Guard Running Stable Valid\nw Bandwidth=1000",
            "identitybase64"
        );
        assert_eq!(
            parse_router_status_address(&entry).unwrap(),
            "192.0.2.10".parse::<IpAddr>().unwrap()
        );
        assert!(parse_router_status_address("s Fast").is_err());
        assert!(parse_router_status_address("r alpha id digest date time notanip 9001 0").is_err());
    }

    #[test]
    fn test_parse_protocol_info() {
        let lines = vec![
            "PROTOCOLINFO 1".to_string(),
            r#"AUTH METHODS=COOKIE,SAFECOOKIE COOKIEFILE="/var/lib/tor/control_auth_cookie""#.to_string(),
            r#"VERSION Tor="0.4.8.12""#.to_string(),
            "OK".to_string(),
        ];
        let info = parse_protocol_info(&lines);
        assert_eq!(info.methods, vec!["COOKIE", "SAFECOOKIE"]);
        assert_eq!(info.cookie_file, Some(PathBuf::from("/var/lib/tor/control_auth_cookie")));
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote(r#"pa"ss\word"#), r#""pa\"ss\\word""#);
    }

    /// Serves scripted replies to a single client, one per received command.
    async fn fake_control_port(replies: Vec<(&'static str, String)>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            let mut reader = BufReader::new(read_half);
            for (expected_prefix, reply) in replies {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                assert!(
                    line.starts_with(expected_prefix),
                    "expected '{}', got '{}'",
                    expected_prefix,
                    line
                );
                write_half.write_all(reply.as_bytes()).await.unwrap();
            }
        });

        port
    }

    #[tokio::test]
    async fn test_session_against_fake_control_port() {
        let port = fake_control_port(vec![
            ("AUTHENTICATE \"secret\"", "250 OK\r\n".to_string()),
            (
                "GETINFO stream-status",
                "250+stream-status=\r\n7 SUCCEEDED 3 example.onion:80\r\n.\r\n250 OK\r\n".to_string(),
            ),
            (
                "GETINFO circuit-status",
                format!("250+circuit-status=\r\n3 BUILT ${}~alpha,${}~beta\r\n.\r\n250 OK\r\n", FP1, FP2),
            ),
            (
                "GETINFO ns/id/",
                format!(
                    "250+ns/id/{}=\r\nr alpha id digest 2025-01-01 00:00:00 198.51.100.7 443 0\r\ns Running\r\n.\r\n250 OK\r\n",
                    FP1
                ),
            ),
            ("QUIT", "250 closing connection\r\n".to_string()),
        ])
        .await;

        let mut controller = TorController::connect_port(port).await.unwrap();
        controller.authenticate(Some("secret")).await.unwrap();

        let streams = controller.streams().await.unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].circuit_id, "3");

        let circuit = controller.circuit("3").await.unwrap().unwrap();
        assert_eq!(circuit.path.len(), 2);

        let address = controller.relay_address(&format!("${}", FP1)).await.unwrap();
        assert_eq!(address, "198.51.100.7".parse::<IpAddr>().unwrap());

        controller.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_single_line_getinfo() {
        let port = fake_control_port(vec![(
            "GETINFO stream-status",
            "250-stream-status=\r\n250 OK\r\n".to_string(),
        )])
        .await;

        let mut controller = TorController::connect_port(port).await.unwrap();
        assert!(controller.streams().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_ascii_status_line_is_a_parse_error() {
        let port = fake_control_port(vec![("GETINFO stream-status", "25é OK\r\n".to_string())]).await;

        let mut controller = TorController::connect_port(port).await.unwrap();
        let err = controller.streams().await.unwrap_err();
        assert!(matches!(err, ScanError::ParseError(_)));
    }

    #[tokio::test]
    async fn test_stalled_reply_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"250-stream-status=\r\n").await.unwrap();
            // Hold the connection without finishing the reply
            std::future::pending::<()>().await;
        });

        let mut controller = TorController::connect_port(port)
            .await
            .unwrap()
            .with_command_timeout(Duration::from_millis(200));
        match controller.streams().await {
            Err(ScanError::Timeout { operation, after }) => {
                assert!(operation.contains("GETINFO"));
                assert_eq!(after, Duration::from_millis(200));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejected_authentication() {
        let port = fake_control_port(vec![(
            "AUTHENTICATE",
            "515 Authentication failed: Password did not match HashedControlPassword value\r\n".to_string(),
        )])
        .await;

        let mut controller = TorController::connect_port(port).await.unwrap();
        let err = controller.authenticate(Some("wrong")).await.unwrap_err();
        assert!(matches!(err, ScanError::ControlError { code: 515, .. }));
    }

    #[tokio::test]
    async fn test_cookie_authentication() {
        let mut cookie = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut cookie, &[0xde, 0xad, 0xbe, 0xef]).unwrap();
        let cookie_path = cookie.path().display().to_string();

        let port = fake_control_port(vec![
            (
                "PROTOCOLINFO",
                format!(
                    "250-PROTOCOLINFO 1\r\n250-AUTH METHODS=COOKIE,SAFECOOKIE COOKIEFILE=\"{}\"\r\n250-VERSION Tor=\"0.4.8.12\"\r\n250 OK\r\n",
                    cookie_path
                ),
            ),
            ("AUTHENTICATE deadbeef", "250 OK\r\n".to_string()),
        ])
        .await;

        let mut controller = TorController::connect_port(port).await.unwrap();
        controller.authenticate(None).await.unwrap();
    }
}
