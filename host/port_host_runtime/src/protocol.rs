use crate::config::InitPayload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, Read, Write};

pub const HOST_TO_APP_CAP: usize = 1_048_576;
pub const APP_TO_HOST_CAP: usize = 1_048_576;

/// Largest serialized session the host will persist. Leaves room in the init
/// frame for the endpoints, seed and envelope keys.
pub const MAX_SESSION_BYTES: usize = HOST_TO_APP_CAP - 65_536;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "t")]
pub enum HostEnvelope {
    #[serde(rename = "init")]
    Init { flags: InitPayload },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "t")]
pub enum AppEnvelope {
    #[serde(rename = "ready")]
    Ready {
        #[serde(default)]
        ports: Vec<String>,
    },

    #[serde(rename = "port")]
    Port {
        name: String,
        #[serde(default)]
        value: Value,
    },
}

pub fn init_envelope(flags: InitPayload) -> HostEnvelope {
    HostEnvelope::Init { flags }
}

pub fn send_envelope(writer: &mut impl Write, envelope: &HostEnvelope) -> io::Result<()> {
    let payload = encode_host_envelope(envelope)?;
    write_frame(writer, &payload, HOST_TO_APP_CAP)?;
    writer.flush()
}

/// Whether the init envelope for `flags` fits in one host-to-app frame.
pub fn init_fits(flags: &InitPayload) -> io::Result<bool> {
    let encoded = encode_host_envelope(&init_envelope(flags.clone()))?;
    Ok(encoded.len() <= HOST_TO_APP_CAP)
}

/// Reads the next envelope from the application. `Ok(None)` means the
/// application closed its end cleanly between frames; a frame cut off in its
/// header or payload is an `UnexpectedEof` error.
pub fn recv_envelope(
    reader: &mut impl Read,
    max_payload: usize,
) -> io::Result<Option<AppEnvelope>> {
    match read_frame(reader, max_payload)? {
        Some(payload) => decode_app_envelope(&payload).map(Some),
        None => Ok(None),
    }
}

fn encode_host_envelope(envelope: &HostEnvelope) -> io::Result<Vec<u8>> {
    serde_json::to_vec(envelope).map_err(json_error)
}

fn decode_app_envelope(payload: &[u8]) -> io::Result<AppEnvelope> {
    serde_json::from_slice(payload).map_err(json_error)
}

fn read_frame(reader: &mut impl Read, max_payload: usize) -> io::Result<Option<Vec<u8>>> {
    let Some(len_buf) = read_header(reader)? else {
        return Ok(None);
    };

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_payload {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} > {max_payload}"),
        ));
    }

    let mut payload = vec![0_u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(payload))
}

/// `Ok(None)` only when EOF arrives before the first header byte.
fn read_header(reader: &mut impl Read) -> io::Result<Option<[u8; 4]>> {
    let mut len_buf = [0_u8; 4];
    let mut filled = 0;

    while filled < len_buf.len() {
        match reader.read(&mut len_buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("truncated frame header: {filled} of 4 bytes"),
                ));
            }
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }

    Ok(Some(len_buf))
}

fn write_frame(writer: &mut impl Write, payload: &[u8], max_payload: usize) -> io::Result<()> {
    if payload.len() > max_payload {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} > {}", payload.len(), max_payload),
        ));
    }

    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "payload exceeds u32"))?;

    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

fn json_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

#[cfg(test)]
pub(crate) fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    write_frame(&mut out, payload, APP_TO_HOST_CAP).expect("frame write");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::io::Cursor;

    #[test]
    fn truncated_frame_is_rejected() {
        let data = vec![0, 0, 0, 5, b'a', b'b'];
        let mut cursor = Cursor::new(data);
        let err = read_frame(&mut cursor, APP_TO_HOST_CAP).expect_err("expected eof");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let len = (HOST_TO_APP_CAP as u32) + 1;
        let data = len.to_be_bytes().to_vec();
        let mut cursor = Cursor::new(data);
        let err = read_frame(&mut cursor, HOST_TO_APP_CAP).expect_err("expected too large");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn endian_is_big_endian() {
        let mut out = Vec::new();
        write_frame(&mut out, b"abc", HOST_TO_APP_CAP).expect("frame write");
        assert_eq!(&out[0..4], &[0, 0, 0, 3]);
    }

    #[test]
    fn truncated_payload_is_not_a_clean_close() {
        let mut cursor = Cursor::new(vec![0, 0, 0, 5, b'a']);
        let err = recv_envelope(&mut cursor, APP_TO_HOST_CAP).expect_err("truncated payload");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn truncated_header_is_not_a_clean_close() {
        let mut cursor = Cursor::new(vec![0, 0]);
        let err = recv_envelope(&mut cursor, APP_TO_HOST_CAP).expect_err("truncated header");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn init_fits_tracks_host_to_app_cap() {
        let mut flags = InitPayload {
            endpoints: BTreeMap::new(),
            session: json!({"token": "x".repeat(100_000)}),
            seed: Some(1),
        };
        assert!(init_fits(&flags).expect("encode"));

        flags.session = json!({"token": "x".repeat(HOST_TO_APP_CAP)});
        assert!(!init_fits(&flags).expect("encode"));
    }

    #[test]
    fn clean_eof_between_frames_ends_stream() {
        let mut cursor = Cursor::new(Vec::new());
        let next = recv_envelope(&mut cursor, APP_TO_HOST_CAP).expect("clean eof");
        assert!(next.is_none());
    }

    #[test]
    fn decodes_ready_then_port_envelopes() {
        let mut data = frame(br#"{"t":"ready","ports":["storeSession","copyToClipboard"]}"#);
        data.extend(frame(br#"{"t":"port","name":"storeSession","value":{"token":"xyz"}}"#));
        let mut cursor = Cursor::new(data);

        match recv_envelope(&mut cursor, APP_TO_HOST_CAP).expect("decode ready") {
            Some(AppEnvelope::Ready { ports }) => {
                assert_eq!(ports, vec!["storeSession", "copyToClipboard"]);
            }
            other => panic!("expected ready, got {other:?}"),
        }

        match recv_envelope(&mut cursor, APP_TO_HOST_CAP).expect("decode port") {
            Some(AppEnvelope::Port { name, value }) => {
                assert_eq!(name, "storeSession");
                assert_eq!(value["token"], "xyz");
            }
            other => panic!("expected port, got {other:?}"),
        }
    }

    #[test]
    fn port_without_value_decodes_as_null() {
        let mut cursor = Cursor::new(frame(br#"{"t":"port","name":"clearSession"}"#));
        match recv_envelope(&mut cursor, APP_TO_HOST_CAP).expect("decode port") {
            Some(AppEnvelope::Port { value, .. }) => assert!(value.is_null()),
            other => panic!("expected port, got {other:?}"),
        }
    }

    #[test]
    fn unknown_envelope_tag_is_invalid_data() {
        let mut cursor = Cursor::new(frame(br#"{"t":"render","rev":1}"#));
        let err = recv_envelope(&mut cursor, APP_TO_HOST_CAP).expect_err("unknown tag");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn encodes_init_envelope_with_flat_flags() {
        let flags = InitPayload {
            endpoints: BTreeMap::from([("apiUrl".to_string(), "http://localhost:3000".to_string())]),
            session: json!({"token": "abc"}),
            seed: None,
        };

        let mut out = Vec::new();
        send_envelope(&mut out, &init_envelope(flags)).expect("send init");

        let value: Value = serde_json::from_slice(&out[4..]).expect("parse encoded json");
        assert_eq!(value["t"], "init");
        assert_eq!(value["flags"]["apiUrl"], "http://localhost:3000");
        assert_eq!(value["flags"]["session"]["token"], "abc");
        assert!(value["flags"].get("seed").is_none());
    }
}
