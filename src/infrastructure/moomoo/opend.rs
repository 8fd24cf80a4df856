//! OpenD gateway transport.
//!
//! Each message is a 44-byte little-endian header followed by a JSON body:
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0 | 2 | `"FT"` |
//! | 2 | 4 | proto id |
//! | 6 | 1 | format (1 = JSON) |
//! | 7 | 1 | proto version |
//! | 8 | 4 | serial number |
//! | 12 | 4 | body length |
//! | 16 | 20 | SHA-1 of the body |
//! | 36 | 8 | reserved |

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::errors::{BrokerError, BrokerResult};

pub const HEADER_LEN: usize = 44;
const HEADER_FLAG: &[u8; 2] = b"FT";
const FORMAT_JSON: u8 = 1;
const PROTO_VERSION: u8 = 0;
const MAX_BODY_LEN: u32 = 16 * 1024 * 1024;

pub const PROTO_INIT_CONNECT: u32 = 1001;
pub const PROTO_GET_ACC_LIST: u32 = 2001;
pub const PROTO_GET_POSITION_LIST: u32 = 2102;
pub const PROTO_GET_ORDER_LIST: u32 = 2201;
pub const PROTO_PLACE_ORDER: u32 = 2202;
pub const PROTO_MODIFY_ORDER: u32 = 2205;

const CLIENT_ID: &str = "signal_trader";
const CLIENT_VER: u32 = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct FrameHeader {
    pub proto_id: u32,
    pub format: u8,
    pub serial: u32,
    pub body_len: u32,
    pub body_sha1: [u8; 20],
}

pub fn encode_frame(proto_id: u32, serial: u32, body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(HEADER_FLAG);
    frame.extend_from_slice(&proto_id.to_le_bytes());
    frame.push(FORMAT_JSON);
    frame.push(PROTO_VERSION);
    frame.extend_from_slice(&serial.to_le_bytes());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&Sha1::digest(body));
    frame.extend_from_slice(&[0u8; 8]);
    frame.extend_from_slice(body);
    frame
}

pub fn decode_header(buf: &[u8; HEADER_LEN]) -> BrokerResult<FrameHeader> {
    if &buf[0..2] != HEADER_FLAG {
        return Err(BrokerError::Connection(
            "OpenD frame missing FT header flag".to_string(),
        ));
    }
    let u32_at = |offset: usize| {
        u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
    };
    let mut body_sha1 = [0u8; 20];
    body_sha1.copy_from_slice(&buf[16..36]);

    Ok(FrameHeader {
        proto_id: u32_at(2),
        format: buf[6],
        serial: u32_at(8),
        body_len: u32_at(12),
        body_sha1,
    })
}

/// Check the `retType` envelope and hand back `s2c`.
pub fn unwrap_response(proto_id: u32, body: &[u8]) -> BrokerResult<Value> {
    let response: Value = serde_json::from_slice(body).map_err(|e| {
        BrokerError::Exchange(format!("OpenD proto {}: invalid JSON body: {}", proto_id, e))
    })?;

    let ret_type = response.get("retType").and_then(Value::as_i64).unwrap_or(-1);
    if ret_type != 0 {
        let msg = response
            .get("retMsg")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(BrokerError::Exchange(format!(
            "OpenD proto {} failed (retType {}): {}",
            proto_id, ret_type, msg
        )));
    }

    Ok(response.get("s2c").cloned().unwrap_or(Value::Null))
}

/// Request/response access to an OpenD gateway.
#[async_trait]
pub trait MoomooGateway: Send + Sync {
    /// Send `c2s` under `proto_id` and return the response `s2c` object.
    async fn request(&self, proto_id: u32, c2s: Value) -> BrokerResult<Value>;
}

struct Session {
    stream: TcpStream,
    conn_id: u64,
}

/// TCP gateway with a single lazily (re)established session.
pub struct OpenDGateway {
    addr: String,
    timeout: Duration,
    session: Mutex<Option<Session>>,
    serial: AtomicU32,
}

impl OpenDGateway {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
            timeout,
            session: Mutex::new(None),
            serial: AtomicU32::new(1),
        }
    }

    fn next_serial(&self) -> u32 {
        self.serial.fetch_add(1, Ordering::Relaxed)
    }

    async fn open(&self) -> BrokerResult<Session> {
        let mut stream = TcpStream::connect(&self.addr).await.map_err(|e| {
            BrokerError::Connection(format!("OpenD connect to {} failed: {}", self.addr, e))
        })?;

        let c2s = json!({
            "clientVer": CLIENT_VER,
            "clientID": CLIENT_ID,
            "recvNotify": false,
        });
        let s2c = self
            .exchange(&mut stream, PROTO_INIT_CONNECT, c2s)
            .await?;
        let conn_id = s2c.get("connID").and_then(value_u64).unwrap_or(0);

        info!("✓ Connected to OpenD at {} (connID {})", self.addr, conn_id);
        Ok(Session { stream, conn_id })
    }

    async fn exchange(
        &self,
        stream: &mut TcpStream,
        proto_id: u32,
        c2s: Value,
    ) -> BrokerResult<Value> {
        let body = serde_json::to_vec(&json!({ "c2s": c2s }))
            .map_err(|e| BrokerError::Validation(format!("OpenD request encoding: {}", e)))?;
        let serial = self.next_serial();

        stream
            .write_all(&encode_frame(proto_id, serial, &body))
            .await
            .map_err(io_error)?;

        let mut header_buf = [0u8; HEADER_LEN];
        stream.read_exact(&mut header_buf).await.map_err(io_error)?;
        let header = decode_header(&header_buf)?;

        if header.proto_id != proto_id || header.serial != serial {
            return Err(BrokerError::Connection(format!(
                "OpenD reply mismatch: expected proto {} serial {}, got proto {} serial {}",
                proto_id, serial, header.proto_id, header.serial
            )));
        }
        if header.body_len > MAX_BODY_LEN {
            return Err(BrokerError::Connection(format!(
                "OpenD body too large: {} bytes",
                header.body_len
            )));
        }

        let mut reply = vec![0u8; header.body_len as usize];
        stream.read_exact(&mut reply).await.map_err(io_error)?;

        if Sha1::digest(&reply).as_slice() != header.body_sha1 {
            return Err(BrokerError::Connection(
                "OpenD body checksum mismatch".to_string(),
            ));
        }

        debug!("OpenD proto {} serial {} ok ({} bytes)", proto_id, serial, reply.len());
        unwrap_response(proto_id, &reply)
    }

    async fn request_inner(&self, proto_id: u32, mut c2s: Value) -> BrokerResult<Value> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        let Some(session) = guard.as_mut() else {
            return Err(BrokerError::Connection("OpenD session unavailable".to_string()));
        };

        // Trade writes carry a replay-protection packet id.
        if matches!(proto_id, PROTO_PLACE_ORDER | PROTO_MODIFY_ORDER) {
            if let Some(obj) = c2s.as_object_mut() {
                obj.insert(
                    "packetID".to_string(),
                    json!({ "connID": session.conn_id, "serialNo": self.next_serial() }),
                );
            }
        }

        let result = self.exchange(&mut session.stream, proto_id, c2s).await;
        if let Err(BrokerError::Connection(reason)) = &result {
            warn!("Dropping OpenD session after transport failure: {}", reason);
            *guard = None;
        }
        result
    }
}

#[async_trait]
impl MoomooGateway for OpenDGateway {
    async fn request(&self, proto_id: u32, c2s: Value) -> BrokerResult<Value> {
        match tokio::time::timeout(self.timeout, self.request_inner(proto_id, c2s)).await {
            Ok(result) => result,
            Err(_) => {
                // The stream may hold a half-read reply.
                *self.session.lock().await = None;
                Err(BrokerError::Connection(format!(
                    "OpenD proto {} timed out after {:?}",
                    proto_id, self.timeout
                )))
            }
        }
    }
}

fn io_error(e: std::io::Error) -> BrokerError {
    BrokerError::Connection(format!("OpenD I/O error: {}", e))
}

/// OpenD sends 64-bit ids either as numbers or as strings.
pub fn value_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_frame_header_layout() {
        let body = br#"{"c2s":{}}"#;
        let frame = encode_frame(PROTO_GET_ACC_LIST, 7, body);
        assert_eq!(frame.len(), HEADER_LEN + body.len());
        assert_eq!(&frame[0..2], b"FT");
        assert_eq!(frame[6], FORMAT_JSON);

        let mut header_buf = [0u8; HEADER_LEN];
        header_buf.copy_from_slice(&frame[..HEADER_LEN]);
        let header = decode_header(&header_buf).unwrap();
        assert_eq!(header.proto_id, PROTO_GET_ACC_LIST);
        assert_eq!(header.serial, 7);
        assert_eq!(header.body_len as usize, body.len());
        assert_eq!(header.body_sha1.as_slice(), Sha1::digest(body).as_slice());
        assert_eq!(&frame[36..44], &[0u8; 8]);
    }

    #[test]
    fn test_bad_flag_rejected() {
        let mut header_buf = [0u8; HEADER_LEN];
        header_buf[0] = b'X';
        assert!(matches!(
            decode_header(&header_buf),
            Err(BrokerError::Connection(_))
        ));
    }

    #[test]
    fn test_unwrap_response() {
        let ok = br#"{"retType":0,"retMsg":"","s2c":{"accList":[]}}"#;
        assert_eq!(
            unwrap_response(PROTO_GET_ACC_LIST, ok).unwrap(),
            json!({"accList": []})
        );

        let failed = br#"{"retType":-1,"retMsg":"unlock needed"}"#;
        match unwrap_response(PROTO_PLACE_ORDER, failed) {
            Err(BrokerError::Exchange(msg)) => assert!(msg.contains("unlock needed")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_numeric_fields_accept_strings() {
        assert_eq!(value_u64(&json!(42)), Some(42));
        assert_eq!(value_u64(&json!("281756457888247915")), Some(281756457888247915));
        assert_eq!(value_u64(&json!(null)), None);
        assert_eq!(value_f64(&json!("1.5")), Some(1.5));
    }

    /// Minimal OpenD stand-in: answers InitConnect then echoes an empty s2c.
    async fn fake_opend() -> (String, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            loop {
                let mut header_buf = [0u8; HEADER_LEN];
                if socket.read_exact(&mut header_buf).await.is_err() {
                    break;
                }
                let header = decode_header(&header_buf).unwrap();
                let mut body = vec![0u8; header.body_len as usize];
                socket.read_exact(&mut body).await.unwrap();

                let reply = if header.proto_id == PROTO_INIT_CONNECT {
                    json!({"retType": 0, "s2c": {"connID": "99", "keepAliveInterval": 10}})
                } else {
                    let request: Value = serde_json::from_slice(&body).unwrap();
                    json!({"retType": 0, "s2c": {"echo": request["c2s"]}})
                };
                let reply = serde_json::to_vec(&reply).unwrap();
                socket
                    .write_all(&encode_frame(header.proto_id, header.serial, &reply))
                    .await
                    .unwrap();
            }
        });
        (addr.ip().to_string(), addr.port())
    }

    #[tokio::test]
    async fn test_gateway_round_trip_adds_packet_id() {
        let (host, port) = fake_opend().await;
        let gateway = OpenDGateway::new(&host, port, Duration::from_secs(2));

        let s2c = gateway
            .request(PROTO_PLACE_ORDER, json!({"code": "AAPL"}))
            .await
            .unwrap();
        assert_eq!(s2c["echo"]["code"], "AAPL");
        assert_eq!(s2c["echo"]["packetID"]["connID"], 99);

        let s2c = gateway
            .request(PROTO_GET_ACC_LIST, json!({"userID": 0}))
            .await
            .unwrap();
        assert!(s2c["echo"].get("packetID").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let gateway = OpenDGateway::new("127.0.0.1", port, Duration::from_secs(1));
        assert!(matches!(
            gateway.request(PROTO_GET_ACC_LIST, json!({})).await,
            Err(BrokerError::Connection(_))
        ));
    }
}
