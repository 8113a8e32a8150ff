//! Build worker connections.
//!
//! A [`WorkerClient`] owns one connection to a build worker's control
//! endpoint and the protocol version negotiated over it. The wire format is
//! length-prefixed:
//!
//! ```text
//! ┌─────────────────┬──────────────────────────────┐
//! │ Length (4 bytes)│ Message Body (variable)      │
//! │ big-endian      │                              │
//! └─────────────────┴──────────────────────────────┘
//! ```
//!
//! with a one-byte message type followed by the payload. The actual build
//! traffic is carried elsewhere by the engine; this connection only
//! negotiates versions, answers health probes and bootstraps builders.

use crate::error::{ForgeError, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

/// Newest protocol version this client speaks.
pub const PROTOCOL_VERSION: u32 = 2;
/// Oldest protocol version this client still accepts.
pub const MIN_PROTOCOL_VERSION: u32 = 1;
/// Environment variable pinning the protocol version instead of negotiating.
pub const VERSION_ENV: &str = "FORGE_API_VERSION";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Frames larger than this are rejected as protocol errors.
const MAX_FRAME_LEN: u32 = 1024 * 1024;

/// Message types for the worker control protocol.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageType {
    /// Version exchange, both directions.
    Hello = 0x01,
    /// Health probe from client to worker.
    Ping = 0x02,
    /// Health probe answer.
    Pong = 0x03,
    /// Bootstrap a named builder on the worker.
    Bootstrap = 0x04,
    /// Positive acknowledgement.
    Ack = 0x05,
    /// Failure carrying a message.
    Error = 0x06,
}

impl TryFrom<u8> for MessageType {
    type Error = ForgeError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(MessageType::Hello),
            0x02 => Ok(MessageType::Ping),
            0x03 => Ok(MessageType::Pong),
            0x04 => Ok(MessageType::Bootstrap),
            0x05 => Ok(MessageType::Ack),
            0x06 => Ok(MessageType::Error),
            _ => Err(ForgeError::Internal(format!("Unknown message type: {}", value))),
        }
    }
}

/// Control protocol messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hello { version: u32 },
    Ping,
    Pong,
    Bootstrap { builder: String, image: Option<String> },
    Ack,
    Error { message: String },
}

impl Message {
    /// Encode the message body (without the length prefix).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Message::Hello { version } => {
                buf.push(MessageType::Hello as u8);
                buf.extend_from_slice(&version.to_be_bytes());
            }
            Message::Ping => buf.push(MessageType::Ping as u8),
            Message::Pong => buf.push(MessageType::Pong as u8),
            Message::Bootstrap { builder, image } => {
                buf.push(MessageType::Bootstrap as u8);
                let name = builder.as_bytes();
                buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
                buf.extend_from_slice(name);
                let image = image.as_deref().unwrap_or("").as_bytes();
                buf.extend_from_slice(&(image.len() as u16).to_be_bytes());
                buf.extend_from_slice(image);
            }
            Message::Ack => buf.push(MessageType::Ack as u8),
            Message::Error { message } => {
                buf.push(MessageType::Error as u8);
                buf.extend_from_slice(message.as_bytes());
            }
        }
        buf
    }

    /// Decode a message body (without the length prefix).
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(ForgeError::Internal("Empty message".to_string()));
        }
        let msg_type = MessageType::try_from(data[0])?;
        let payload = &data[1..];

        match msg_type {
            MessageType::Hello => {
                if payload.len() < 4 {
                    return Err(ForgeError::Internal("Hello too short".to_string()));
                }
                let version = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
                Ok(Message::Hello { version })
            }
            MessageType::Ping => Ok(Message::Ping),
            MessageType::Pong => Ok(Message::Pong),
            MessageType::Bootstrap => {
                if payload.len() < 2 {
                    return Err(ForgeError::Internal("Bootstrap too short".to_string()));
                }
                let name_len = u16::from_be_bytes([payload[0], payload[1]]) as usize;
                let name_end = 2 + name_len;
                if payload.len() < name_end + 2 {
                    return Err(ForgeError::Internal("Bootstrap truncated".to_string()));
                }
                let builder = String::from_utf8_lossy(&payload[2..name_end]).to_string();
                let image_len =
                    u16::from_be_bytes([payload[name_end], payload[name_end + 1]]) as usize;
                let image_start = name_end + 2;
                if payload.len() < image_start + image_len {
                    return Err(ForgeError::Internal("Bootstrap truncated".to_string()));
                }
                let image = if image_len == 0 {
                    None
                } else {
                    Some(
                        String::from_utf8_lossy(&payload[image_start..image_start + image_len])
                            .to_string(),
                    )
                };
                Ok(Message::Bootstrap { builder, image })
            }
            MessageType::Ack => Ok(Message::Ack),
            MessageType::Error => {
                Ok(Message::Error { message: String::from_utf8_lossy(payload).to_string() })
            }
        }
    }
}

/// A worker endpoint: `tcp://host:port`, `unix:///path`, or a bare
/// `host:port` which is treated as tcp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(String),
    Unix(PathBuf),
}

impl Endpoint {
    pub fn parse(spec: &str) -> Result<Self> {
        if let Some(addr) = spec.strip_prefix("tcp://") {
            return Ok(Endpoint::Tcp(addr.to_string()));
        }
        if let Some(path) = spec.strip_prefix("unix://") {
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }
        if spec.contains("://") {
            return Err(ForgeError::InvalidConfig {
                reason: format!("unsupported endpoint scheme: {}", spec),
            });
        }
        Ok(Endpoint::Tcp(spec.to_string()))
    }
}

enum WorkerStream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl std::fmt::Debug for WorkerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStream::Tcp(_) => write!(f, "WorkerStream::Tcp"),
            WorkerStream::Unix(_) => write!(f, "WorkerStream::Unix"),
        }
    }
}

impl WorkerStream {
    async fn write_frame(&mut self, msg: &Message) -> std::io::Result<()> {
        let body = msg.encode();
        let len = (body.len() as u32).to_be_bytes();
        match self {
            WorkerStream::Tcp(s) => {
                s.write_all(&len).await?;
                s.write_all(&body).await?;
                s.flush().await
            }
            WorkerStream::Unix(s) => {
                s.write_all(&len).await?;
                s.write_all(&body).await?;
                s.flush().await
            }
        }
    }

    async fn read_frame(&mut self) -> std::io::Result<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        match self {
            WorkerStream::Tcp(s) => s.read_exact(&mut len_buf).await?,
            WorkerStream::Unix(s) => s.read_exact(&mut len_buf).await?,
        };
        let len = u32::from_be_bytes(len_buf);
        if len == 0 || len > MAX_FRAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid frame length {}", len),
            ));
        }
        let mut body = vec![0u8; len as usize];
        match self {
            WorkerStream::Tcp(s) => s.read_exact(&mut body).await?,
            WorkerStream::Unix(s) => s.read_exact(&mut body).await?,
        };
        Ok(body)
    }
}

/// Mutual-TLS material for a worker connection.
///
/// Loaded from the `ca`/`cert`/`key` driver options and handed to the build
/// engine together with the client; the control handshake itself does not use
/// it.
#[derive(Clone)]
pub struct TlsMaterial {
    pub ca: Vec<u8>,
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_len", &self.ca.len())
            .field("cert_len", &self.cert.len())
            .field("key_len", &self.key.len())
            .finish()
    }
}

impl TlsMaterial {
    /// Load TLS material from driver options.
    ///
    /// Requires all of `ca`, `cert` and `key` to be present; a partial set is
    /// ignored. The three keys are consumed so drivers never see them.
    pub fn from_driver_opts(opts: &mut BTreeMap<String, String>) -> Result<Option<Self>> {
        let (Some(ca_path), Some(cert_path), Some(key_path)) =
            (opts.get("ca").cloned(), opts.get("cert").cloned(), opts.get("key").cloned())
        else {
            return Ok(None);
        };

        let material = TlsMaterial {
            ca: read_pem(&ca_path)?,
            cert: read_pem(&cert_path)?,
            key: read_pem(&key_path)?,
        };

        opts.remove("ca");
        opts.remove("cert");
        opts.remove("key");

        Ok(Some(material))
    }
}

fn read_pem(path: &str) -> Result<Vec<u8>> {
    let data = std::fs::read(path)
        .map_err(|e| ForgeError::FileReadError { path: path.to_string(), source: e })?;
    if !data.windows(10).any(|w| w == b"-----BEGIN") {
        return Err(ForgeError::InvalidConfig {
            reason: format!("{} is not PEM-encoded", path),
        });
    }
    Ok(data)
}

/// A negotiated connection to one build worker.
#[derive(Debug)]
pub struct WorkerClient {
    endpoint: String,
    version: u32,
    tls: Option<TlsMaterial>,
    stream: Mutex<WorkerStream>,
}

impl WorkerClient {
    /// Connect to a worker endpoint and negotiate the protocol version.
    ///
    /// TLS material is consumed from the driver options (see
    /// [`TlsMaterial::from_driver_opts`]). The whole attempt is bounded by a
    /// connect timeout so unreachable endpoints fail fast.
    pub async fn connect(endpoint: &str, opts: &mut BTreeMap<String, String>) -> Result<Self> {
        let parsed = Endpoint::parse(endpoint)?;
        let tls = TlsMaterial::from_driver_opts(opts)?;

        debug!(endpoint = %endpoint, tls = tls.is_some(), "connecting to build worker");

        let connect = async {
            let stream = match &parsed {
                Endpoint::Tcp(addr) => WorkerStream::Tcp(
                    TcpStream::connect(addr).await.map_err(|e| connection_failed(endpoint, &e))?,
                ),
                Endpoint::Unix(path) => WorkerStream::Unix(
                    UnixStream::connect(path).await.map_err(|e| connection_failed(endpoint, &e))?,
                ),
            };
            let mut client =
                WorkerClient { endpoint: endpoint.to_string(), version: 0, tls, stream: Mutex::new(stream) };
            client.version = client.negotiate().await?;
            Ok::<_, ForgeError>(client)
        };

        let client = timeout(CONNECT_TIMEOUT, connect).await.map_err(|_| {
            ForgeError::ConnectionFailed {
                endpoint: endpoint.to_string(),
                reason: "connection timed out".to_string(),
            }
        })??;

        debug!(endpoint = %endpoint, version = client.version, "connected");
        Ok(client)
    }

    /// Exchange versions with the worker.
    ///
    /// With [`VERSION_ENV`] set the version is pinned and the worker must
    /// offer exactly that version; otherwise the negotiated version is the
    /// lower of the two, which must still be one this client accepts.
    async fn negotiate(&mut self) -> Result<u32> {
        let pinned = match std::env::var(VERSION_ENV) {
            Ok(raw) => Some(raw.parse::<u32>().map_err(|_| ForgeError::InvalidConfig {
                reason: format!("{} must be an integer, got '{}'", VERSION_ENV, raw),
            })?),
            Err(_) => None,
        };
        let requested = pinned.unwrap_or(PROTOCOL_VERSION);

        let offered = match self.roundtrip(Message::Hello { version: requested }).await? {
            Message::Hello { version } => version,
            Message::Error { message } => {
                return Err(ForgeError::ProtocolError { endpoint: self.endpoint.clone(), reason: message })
            }
            other => {
                return Err(ForgeError::ProtocolError {
                    endpoint: self.endpoint.clone(),
                    reason: format!("unexpected reply to hello: {:?}", other),
                })
            }
        };

        let mismatch = || ForgeError::VersionMismatch {
            endpoint: self.endpoint.clone(),
            requested,
            offered,
        };

        match pinned {
            Some(version) if offered != version => Err(mismatch()),
            Some(version) => Ok(version),
            None => {
                let negotiated = requested.min(offered);
                if negotiated < MIN_PROTOCOL_VERSION {
                    return Err(mismatch());
                }
                Ok(negotiated)
            }
        }
    }

    async fn roundtrip(&self, msg: Message) -> Result<Message> {
        let io = async {
            let mut stream = self.stream.lock().await;
            stream.write_frame(&msg).await?;
            stream.read_frame().await
        };
        let body = timeout(IO_TIMEOUT, io)
            .await
            .map_err(|_| ForgeError::ProtocolError {
                endpoint: self.endpoint.clone(),
                reason: "worker did not reply in time".to_string(),
            })?
            .map_err(|e| connection_failed(&self.endpoint, &e))?;
        Message::decode(&body)
    }

    /// Probe the worker.
    pub async fn ping(&self) -> Result<()> {
        match self.roundtrip(Message::Ping).await? {
            Message::Pong => Ok(()),
            Message::Error { message } => {
                Err(ForgeError::ProtocolError { endpoint: self.endpoint.clone(), reason: message })
            }
            other => Err(ForgeError::ProtocolError {
                endpoint: self.endpoint.clone(),
                reason: format!("unexpected reply to ping: {:?}", other),
            }),
        }
    }

    /// Bootstrap a named builder on the worker.
    pub async fn bootstrap(&self, builder: &str, image: Option<&str>) -> Result<()> {
        let msg =
            Message::Bootstrap { builder: builder.to_string(), image: image.map(str::to_string) };
        match self.roundtrip(msg).await? {
            Message::Ack => Ok(()),
            Message::Error { message } => {
                Err(ForgeError::ProtocolError { endpoint: self.endpoint.clone(), reason: message })
            }
            other => Err(ForgeError::ProtocolError {
                endpoint: self.endpoint.clone(),
                reason: format!("unexpected reply to bootstrap: {:?}", other),
            }),
        }
    }

    /// The endpoint this client is connected to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The negotiated protocol version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// TLS material for the engine's build transport, if configured.
    pub fn tls(&self) -> Option<&TlsMaterial> {
        self.tls.as_ref()
    }
}

fn connection_failed(endpoint: &str, err: &std::io::Error) -> ForgeError {
    ForgeError::ConnectionFailed { endpoint: endpoint.to_string(), reason: err.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_roundtrip() {
        let msg = Message::Hello { version: 7 };
        assert_eq!(Message::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_bootstrap_roundtrip() {
        let msg = Message::Bootstrap {
            builder: "forge_buildkit_worker0".to_string(),
            image: Some("registry.local/buildkit:stable".to_string()),
        };
        assert_eq!(Message::decode(&msg.encode()).unwrap(), msg);

        let no_image = Message::Bootstrap { builder: "b".to_string(), image: None };
        assert_eq!(Message::decode(&no_image.encode()).unwrap(), no_image);
    }

    #[test]
    fn test_error_roundtrip() {
        let msg = Message::Error { message: "boom".to_string() };
        assert_eq!(Message::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Message::decode(&[]).is_err());
        assert!(Message::decode(&[0xff]).is_err());
        assert!(Message::decode(&[0x01, 0x00]).is_err());
    }

    #[test]
    fn test_endpoint_parse() {
        assert_eq!(
            Endpoint::parse("tcp://10.0.0.5:2376").unwrap(),
            Endpoint::Tcp("10.0.0.5:2376".to_string())
        );
        assert_eq!(
            Endpoint::parse("unix:///run/worker.sock").unwrap(),
            Endpoint::Unix(PathBuf::from("/run/worker.sock"))
        );
        assert_eq!(
            Endpoint::parse("10.0.0.5:2376").unwrap(),
            Endpoint::Tcp("10.0.0.5:2376".to_string())
        );
        assert!(Endpoint::parse("ssh://example.com").is_err());
    }

    #[test]
    fn test_tls_material_requires_all_three() {
        let mut opts = BTreeMap::from([("ca".to_string(), "/nope/ca.pem".to_string())]);
        let material = TlsMaterial::from_driver_opts(&mut opts).unwrap();
        assert!(material.is_none());
        // Partial sets are left untouched.
        assert!(opts.contains_key("ca"));
    }

    #[test]
    fn test_tls_material_loaded_and_consumed() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["ca.pem", "cert.pem", "key.pem"] {
            std::fs::write(
                dir.path().join(name),
                "-----BEGIN CERTIFICATE-----\nZm9yZ2U=\n-----END CERTIFICATE-----\n",
            )
            .unwrap();
        }
        let mut opts = BTreeMap::from([
            ("ca".to_string(), dir.path().join("ca.pem").display().to_string()),
            ("cert".to_string(), dir.path().join("cert.pem").display().to_string()),
            ("key".to_string(), dir.path().join("key.pem").display().to_string()),
            ("image".to_string(), "buildkit:stable".to_string()),
        ]);

        let material = TlsMaterial::from_driver_opts(&mut opts).unwrap().unwrap();
        assert!(!material.ca.is_empty());
        assert!(!opts.contains_key("ca"));
        assert!(!opts.contains_key("cert"));
        assert!(!opts.contains_key("key"));
        assert!(opts.contains_key("image"));
    }

    #[test]
    fn test_tls_material_rejects_non_pem() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["ca.pem", "cert.pem", "key.pem"] {
            std::fs::write(dir.path().join(name), "not a certificate").unwrap();
        }
        let mut opts = BTreeMap::from([
            ("ca".to_string(), dir.path().join("ca.pem").display().to_string()),
            ("cert".to_string(), dir.path().join("cert.pem").display().to_string()),
            ("key".to_string(), dir.path().join("key.pem").display().to_string()),
        ]);
        assert!(TlsMaterial::from_driver_opts(&mut opts).is_err());
    }
}
