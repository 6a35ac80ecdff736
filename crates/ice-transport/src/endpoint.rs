//! Endpoint: the transport-specific half of a proxy's address information
//! (spec.md §3 "Endpoint", §5). A proxy carries a list of endpoints to try,
//! each naming a transport kind plus whatever parameters that transport
//! needs (host/port, timeout, compression flag, security requirement).

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ice_core::encoding::VersionPair;
use ice_core::LocalError;

/// Transport-kind discriminant carried in an endpoint's wire encapsulation
/// header (spec.md §4.1 "Endpoint"). Kept open-ended via `Opaque` so a
/// peer can forward an endpoint for a transport it doesn't itself
/// implement (spec.md §5, §7 "unknown endpoint types are preserved").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EndpointKind {
    Tcp,
    Ssl,
    Udp,
    Ws,
    Wss,
    Opaque(i16),
}

impl EndpointKind {
    /// Wire type-id for this transport (spec.md §4.1 "Endpoint"), mirroring
    /// the original source's registered transport ids.
    pub fn type_id(self) -> i16 {
        match self {
            EndpointKind::Tcp => 1,
            EndpointKind::Ssl => 2,
            EndpointKind::Udp => 3,
            EndpointKind::Ws => 4,
            EndpointKind::Wss => 5,
            EndpointKind::Opaque(id) => id,
        }
    }

    pub fn from_type_id(id: i16) -> Self {
        match id {
            1 => EndpointKind::Tcp,
            2 => EndpointKind::Ssl,
            3 => EndpointKind::Udp,
            4 => EndpointKind::Ws,
            5 => EndpointKind::Wss,
            other => EndpointKind::Opaque(other),
        }
    }

    pub fn is_secure(self) -> bool {
        matches!(self, EndpointKind::Ssl | EndpointKind::Wss)
    }

    pub fn is_datagram(self) -> bool {
        matches!(self, EndpointKind::Udp)
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKind::Tcp => write!(f, "tcp"),
            EndpointKind::Ssl => write!(f, "ssl"),
            EndpointKind::Udp => write!(f, "udp"),
            EndpointKind::Ws => write!(f, "ws"),
            EndpointKind::Wss => write!(f, "wss"),
            EndpointKind::Opaque(id) => write!(f, "opaque(type={id})"),
        }
    }
}

/// Parameters common to the host-addressable transports (TCP, SSL, UDP,
/// WS, WSS). WebSocket endpoints add a `resource` path on top of these
/// (spec.md §5, "WS/WSS adds the HTTP Upgrade handshake").
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct HostParams {
    pub host: Arc<str>,
    pub port: u16,
    pub connection_timeout: Duration,
    /// WebSocket resource path (e.g. `/ice`), unused by non-WS endpoints.
    pub resource: Arc<str>,
}

/// A connector/acceptor-bearing endpoint (spec.md §3, §5). An opaque
/// endpoint preserves its raw encapsulation so that a proxy received from
/// a peer can still be stringified, compared, and re-marshaled even if
/// this process has no connector registered for its transport.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Endpoint {
    Known {
        kind: EndpointKind,
        params: HostParams,
    },
    Opaque {
        kind: EndpointKind,
        /// Encoding version of `encoded_params`, carried through
        /// unchanged so a re-stringified opaque endpoint is byte-for-byte
        /// identical to the one originally parsed (spec.md §8 scenario 6).
        encoding: VersionPair,
        encoded_params: Arc<[u8]>,
    },
}

impl Endpoint {
    pub fn kind(&self) -> EndpointKind {
        match self {
            Endpoint::Known { kind, .. } => *kind,
            Endpoint::Opaque { kind, .. } => *kind,
        }
    }

    pub fn is_secure(&self) -> bool {
        self.kind().is_secure()
    }

    pub fn is_datagram(&self) -> bool {
        self.kind().is_datagram()
    }

    /// The `transport host:port` stringified form used by proxy string
    /// parsing (spec.md §3 "stringified proxy grammar").
    pub fn to_string_form(&self) -> String {
        match self {
            Endpoint::Known { kind, params } => {
                if params.resource.is_empty() {
                    format!("{kind} -h {} -p {}", params.host, params.port)
                } else {
                    format!(
                        "{kind} -h {} -p {} -r {}",
                        params.host, params.port, params.resource
                    )
                }
            }
            Endpoint::Opaque {
                kind,
                encoding,
                encoded_params,
            } => {
                format!(
                    "opaque -t {} -e {}.{} -v {}",
                    kind.type_id(),
                    encoding.major,
                    encoding.minor,
                    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, encoded_params)
                )
            }
        }
    }

    /// Parses one `transport opt...` segment of a stringified proxy's
    /// endpoint list (spec.md §6 "endpoint" grammar). `opaque` preserves
    /// an unknown transport's raw encapsulation verbatim so a process
    /// without that transport's plugin can still store, forward, and
    /// re-stringify it byte-identically (spec.md §6 "Opaque endpoint",
    /// §8 scenario 6).
    pub fn parse(transport: &str, tokens: &[&str]) -> Result<Self, LocalError> {
        if transport == "opaque" {
            return Self::parse_opaque(tokens);
        }
        let kind = match transport {
            "tcp" => EndpointKind::Tcp,
            "ssl" => EndpointKind::Ssl,
            "udp" => EndpointKind::Udp,
            "ws" => EndpointKind::Ws,
            "wss" => EndpointKind::Wss,
            other => return Err(LocalError::Other(format!("unknown endpoint transport `{other}`"))),
        };
        let params = parse_host_params(tokens)?;
        Ok(Endpoint::Known { kind, params })
    }

    fn parse_opaque(tokens: &[&str]) -> Result<Self, LocalError> {
        let mut type_id: Option<i16> = None;
        let mut encoding = VersionPair::new(1, 0);
        let mut value: Option<&str> = None;
        let mut i = 0;
        while i < tokens.len() {
            match tokens[i] {
                "-t" => {
                    let raw = next_token(tokens, &mut i, "-t")?;
                    type_id = Some(
                        raw.parse()
                            .map_err(|_| LocalError::Other(format!("invalid opaque endpoint type `{raw}`")))?,
                    );
                }
                "-e" => {
                    let raw = next_token(tokens, &mut i, "-e")?;
                    let (major, minor) = raw
                        .split_once('.')
                        .ok_or_else(|| LocalError::Other(format!("invalid opaque encoding version `{raw}`")))?;
                    encoding = VersionPair::new(
                        major
                            .parse()
                            .map_err(|_| LocalError::Other(format!("invalid opaque encoding version `{raw}`")))?,
                        minor
                            .parse()
                            .map_err(|_| LocalError::Other(format!("invalid opaque encoding version `{raw}`")))?,
                    );
                }
                "-v" => {
                    value = Some(next_token(tokens, &mut i, "-v")?);
                }
                other => return Err(LocalError::Other(format!("unrecognized opaque endpoint option `{other}`"))),
            }
            i += 1;
        }
        let type_id = type_id.ok_or_else(|| LocalError::Other("opaque endpoint missing -t".into()))?;
        let value = value.ok_or_else(|| LocalError::Other("opaque endpoint missing -v".into()))?;
        let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, value)
            .map_err(|e| LocalError::Other(format!("invalid opaque endpoint base64: {e}")))?;
        Ok(Endpoint::Opaque {
            kind: EndpointKind::Opaque(type_id),
            encoding,
            encoded_params: Arc::from(bytes.into_boxed_slice()),
        })
    }

    /// Wire form (spec.md §6 "Endpoint wire form"): `type:i16 |
    /// encapsulation-size:i32 | encoding-version | transport-specific body`.
    /// The encapsulation's `total-size` covers the encoding-version bytes
    /// plus the body, so a reader that doesn't recognize `type` can still
    /// skip the whole endpoint.
    pub fn encode(&self, out: &mut BytesMut) {
        out.put_i16_le(self.kind().type_id());
        let (encoding, body) = match self {
            Endpoint::Known { params, .. } => (ice_core::encoding::ENCODING_VERSION, encode_host_params(params)),
            Endpoint::Opaque {
                encoding,
                encoded_params,
                ..
            } => (*encoding, encoded_params.to_vec()),
        };
        let total_size = 2 + body.len() as i32;
        out.put_i32_le(total_size);
        out.put_u8(encoding.major);
        out.put_u8(encoding.minor);
        out.extend_from_slice(&body);
    }

    /// Decodes one endpoint from its wire form. A `type` this process
    /// doesn't implement a connector for is preserved as
    /// [`Endpoint::Opaque`] rather than rejected, per spec.md §5/§7
    /// "unknown endpoint types are preserved".
    pub fn decode(buf: &mut Bytes) -> Result<Self, LocalError> {
        if buf.remaining() < 2 + 4 {
            return Err(LocalError::Other("truncated endpoint header".into()));
        }
        let type_id = buf.get_i16_le();
        let total_size = buf.get_i32_le();
        if total_size < 2 || (total_size as usize) > buf.remaining() {
            return Err(LocalError::Other("invalid endpoint encapsulation size".into()));
        }
        let mut body = buf.split_to(total_size as usize);
        let major = body.get_u8();
        let minor = body.get_u8();
        let encoding = VersionPair::new(major, minor);
        let kind = EndpointKind::from_type_id(type_id);
        match kind {
            EndpointKind::Tcp | EndpointKind::Ssl | EndpointKind::Udp | EndpointKind::Ws | EndpointKind::Wss => {
                let params = decode_host_params(&mut body)?;
                Ok(Endpoint::Known { kind, params })
            }
            EndpointKind::Opaque(_) => Ok(Endpoint::Opaque {
                kind,
                encoding,
                encoded_params: Arc::from(body.to_vec().into_boxed_slice()),
            }),
        }
    }
}

/// Transport-specific body for the host-addressable endpoint kinds: port,
/// connection-timeout in milliseconds, and the resource path (empty for
/// non-WS transports).
fn encode_host_params(params: &HostParams) -> Vec<u8> {
    let mut out = BytesMut::new();
    out.put_u16_le(params.port);
    out.put_i64_le(params.connection_timeout.as_millis() as i64);
    let host_bytes = params.host.as_bytes();
    out.put_i32_le(host_bytes.len() as i32);
    out.extend_from_slice(host_bytes);
    let resource_bytes = params.resource.as_bytes();
    out.put_i32_le(resource_bytes.len() as i32);
    out.extend_from_slice(resource_bytes);
    out.to_vec()
}

fn decode_host_params(body: &mut BytesMut) -> Result<HostParams, LocalError> {
    if body.remaining() < 2 + 8 + 4 {
        return Err(LocalError::Other("truncated endpoint body".into()));
    }
    let port = body.get_u16_le();
    let timeout_ms = body.get_i64_le();
    let host_len = body.get_i32_le();
    if host_len < 0 || host_len as usize > body.remaining() {
        return Err(LocalError::Other("invalid endpoint host length".into()));
    }
    let host = String::from_utf8(body.split_to(host_len as usize).to_vec())
        .map_err(|e| LocalError::Other(e.to_string()))?;
    if body.remaining() < 4 {
        return Err(LocalError::Other("truncated endpoint body".into()));
    }
    let resource_len = body.get_i32_le();
    if resource_len < 0 || resource_len as usize > body.remaining() {
        return Err(LocalError::Other("invalid endpoint resource length".into()));
    }
    let resource = String::from_utf8(body.split_to(resource_len as usize).to_vec())
        .map_err(|e| LocalError::Other(e.to_string()))?;
    Ok(HostParams {
        host: Arc::from(host),
        port,
        connection_timeout: Duration::from_millis(timeout_ms.max(0) as u64),
        resource: Arc::from(resource),
    })
}

/// Resolved transport-layer peer address, handed from a [`crate::Connector`]
/// to a freshly established [`crate::Transceiver`], or discovered by an
/// [`crate::Acceptor`] for an inbound connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransportAddr {
    pub ip: std::net::IpAddr,
    pub port: u16,
}

impl fmt::Display for TransportAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Parses the `-h host -p port [-t timeout] [-r resource]` option grammar
/// shared by the host-addressable transports (spec.md §3). Transport-
/// specific crates call this for their own stringified-endpoint parsing
/// rather than duplicating the tokenizer.
pub fn parse_host_params(tokens: &[&str]) -> Result<HostParams, LocalError> {
    let mut host: Option<String> = None;
    let mut port: Option<u16> = None;
    let mut timeout = Duration::from_secs(10);
    let mut resource = String::new();

    let mut i = 0;
    while i < tokens.len() {
        match tokens[i] {
            "-h" => {
                host = Some(next_token(tokens, &mut i, "-h")?.to_string());
            }
            "-p" => {
                let raw = next_token(tokens, &mut i, "-p")?;
                port = Some(raw.parse().map_err(|_| {
                    LocalError::Other(format!("invalid port in endpoint string: `{raw}`"))
                })?);
            }
            "-t" => {
                let raw = next_token(tokens, &mut i, "-t")?;
                let ms: u64 = raw
                    .parse()
                    .map_err(|_| LocalError::Other(format!("invalid timeout: `{raw}`")))?;
                timeout = Duration::from_millis(ms);
            }
            "-r" => {
                resource = next_token(tokens, &mut i, "-r")?.to_string();
            }
            other => {
                return Err(LocalError::Other(format!(
                    "unrecognized endpoint option `{other}`"
                )))
            }
        }
        i += 1;
    }

    Ok(HostParams {
        host: Arc::from(host.ok_or_else(|| LocalError::Other("endpoint missing -h host".into()))?),
        port: port.ok_or_else(|| LocalError::Other("endpoint missing -p port".into()))?,
        connection_timeout: timeout,
        resource: Arc::from(resource),
    })
}

fn next_token<'a>(tokens: &'a [&str], i: &mut usize, flag: &str) -> Result<&'a str, LocalError> {
    *i += 1;
    tokens
        .get(*i)
        .copied()
        .ok_or_else(|| LocalError::Other(format!("endpoint option `{flag}` missing its value")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_endpoint_round_trips_through_the_wire_form() {
        let endpoint = Endpoint::Known {
            kind: EndpointKind::Tcp,
            params: HostParams {
                host: Arc::from("localhost"),
                port: 4061,
                connection_timeout: Duration::from_millis(2500),
                resource: Arc::from(""),
            },
        };
        let mut buf = BytesMut::new();
        endpoint.encode(&mut buf);
        let mut frozen = buf.freeze();
        let decoded = Endpoint::decode(&mut frozen).unwrap();
        assert_eq!(endpoint, decoded);
    }

    #[test]
    fn unrecognized_transport_type_decodes_as_opaque() {
        let endpoint = Endpoint::Opaque {
            kind: EndpointKind::Opaque(99),
            encoding: VersionPair::new(1, 0),
            encoded_params: Arc::from(vec![1u8, 2, 3].into_boxed_slice()),
        };
        let mut buf = BytesMut::new();
        endpoint.encode(&mut buf);
        let mut frozen = buf.freeze();
        let decoded = Endpoint::decode(&mut frozen).unwrap();
        assert_eq!(endpoint, decoded);
    }

    #[test]
    fn endpoints_are_totally_ordered() {
        let a = Endpoint::Known {
            kind: EndpointKind::Tcp,
            params: HostParams {
                host: Arc::from("a"),
                port: 1,
                connection_timeout: Duration::from_secs(1),
                resource: Arc::from(""),
            },
        };
        let b = Endpoint::Known {
            kind: EndpointKind::Udp,
            params: HostParams {
                host: Arc::from("a"),
                port: 1,
                connection_timeout: Duration::from_secs(1),
                resource: Arc::from(""),
            },
        };
        assert!(a < b);
        assert_eq!(a.cmp(&a.clone()), Ordering::Equal);
    }
}
