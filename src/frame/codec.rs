use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::TunnelError;
use crate::session::SessionId;

use super::types::{sha1_hex, sha512_hex, Frame};

/// Headers are small (a uuid, two hex digests, a handful of decimal
/// numbers); a header that never finds its separator within this many
/// bytes means the stream is desynchronized, not merely incomplete.
const HEADER_SEARCH_LIMIT: usize = 4096;

/// Per-direction frame codec for the control channel (§4.1, §4.2).
///
/// Implements `tokio_util::codec::{Decoder, Encoder}` so a control
/// connection can be wrapped in a single `Framed<TcpStream, FrameCodec>`
/// that owns the per-direction receive buffer the spec requires: bytes
/// accumulate in the internal `BytesMut` across reads, and `decode` only
/// yields a `Frame` once a complete header *and* its declared body have
/// both arrived — exactly the discipline §4.2 mandates against TCP
/// coalescing/fragmenting a single write into multiple reads or vice versa.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    separator: Vec<u8>,
}

impl FrameCodec {
    pub fn new(separator: impl Into<Vec<u8>>) -> Self {
        Self {
            separator: separator.into(),
        }
    }
}

fn find_separator(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_ports(s: &str) -> Option<Vec<u16>> {
    if s.is_empty() {
        return None;
    }
    s.split(';').map(|p| p.parse::<u16>().ok()).collect()
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = TunnelError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, TunnelError> {
        loop {
            let sep_pos = match find_separator(src, &self.separator) {
                Some(p) => p,
                None => {
                    if src.len() > HEADER_SEARCH_LIMIT {
                        return Err(TunnelError::Protocol(
                            "frame header exceeds maximum length".into(),
                        ));
                    }
                    return Ok(None);
                }
            };

            let header = match std::str::from_utf8(&src[..sep_pos]) {
                Ok(s) => s.to_owned(),
                Err(_) => {
                    tracing::warn!("discarding non-utf8 frame header");
                    src.advance(sep_pos + self.separator.len());
                    continue;
                }
            };

            let tokens: Vec<&str> = header.split_whitespace().collect();
            if tokens.is_empty() {
                src.advance(sep_pos + self.separator.len());
                continue;
            }

            macro_rules! discard_header {
                ($($arg:tt)*) => {{
                    tracing::warn!(header = %header, $($arg)*);
                    src.advance(sep_pos + self.separator.len());
                    continue;
                }};
            }

            match tokens[0] {
                "AUTH" => {
                    if tokens.len() != 3 {
                        discard_header!("malformed AUTH header");
                    }
                    let Some(ports) = parse_ports(tokens[2]) else {
                        discard_header!("malformed AUTH port list");
                    };
                    let secret = tokens[1].to_owned();
                    src.advance(sep_pos + self.separator.len());
                    return Ok(Some(Frame::Auth { secret, ports }));
                }
                "CLOSE" => {
                    if tokens.len() != 2 {
                        discard_header!("malformed CLOSE header");
                    }
                    let Ok(id) = tokens[1].parse::<SessionId>() else {
                        discard_header!("malformed CLOSE session id");
                    };
                    src.advance(sep_pos + self.separator.len());
                    return Ok(Some(Frame::Close { id }));
                }
                "DATA" => {
                    let rest = &tokens[1..];
                    let (id_tok, port_tok, sha1_tok, sha512_tok, len_tok) = match rest.len() {
                        4 => (rest[0], None, rest[1], rest[2], rest[3]),
                        5 => (rest[0], Some(rest[1]), rest[2], rest[3], rest[4]),
                        _ => discard_header!("malformed DATA header"),
                    };
                    let Ok(id) = id_tok.parse::<SessionId>() else {
                        discard_header!("malformed DATA session id");
                    };
                    let port = match port_tok.map(|p| p.parse::<u16>()) {
                        Some(Ok(p)) => Some(p),
                        Some(Err(_)) => discard_header!("malformed DATA port"),
                        None => None,
                    };
                    let Ok(body_len) = len_tok.parse::<usize>() else {
                        // We cannot locate the next frame without a valid
                        // body length: the stream is desynchronized, not
                        // just carrying a bad frame. This is the one
                        // framing failure mode §4.2 calls out as
                        // unrecoverable without the body_len extension.
                        return Err(TunnelError::Protocol(
                            "DATA frame missing valid body_len".into(),
                        ));
                    };
                    let frame_end = sep_pos + self.separator.len() + body_len;
                    if src.len() < frame_end {
                        return Ok(None);
                    }
                    let body = src[sep_pos + self.separator.len()..frame_end].to_vec();
                    let digest_ok = sha1_hex(&body).eq_ignore_ascii_case(sha1_tok)
                        && sha512_hex(&body).eq_ignore_ascii_case(sha512_tok);
                    src.advance(frame_end);
                    if !digest_ok {
                        tracing::warn!(%id, "digest mismatch on DATA frame, discarding");
                        continue;
                    }
                    return Ok(Some(Frame::Data { id, port, body }));
                }
                "SHRED" => {
                    let rest = &tokens[1..];
                    let (id_tok, port_tok, sha1_tok, sha512_tok, len_tok, n_tok, total_tok) =
                        match rest.len() {
                            6 => (rest[0], None, rest[1], rest[2], rest[3], rest[4], rest[5]),
                            7 => (
                                rest[0],
                                Some(rest[1]),
                                rest[2],
                                rest[3],
                                rest[4],
                                rest[5],
                                rest[6],
                            ),
                            _ => discard_header!("malformed SHRED header"),
                        };
                    let Ok(id) = id_tok.parse::<SessionId>() else {
                        discard_header!("malformed SHRED session id");
                    };
                    let port = match port_tok.map(|p| p.parse::<u16>()) {
                        Some(Ok(p)) => Some(p),
                        Some(Err(_)) => discard_header!("malformed SHRED port"),
                        None => None,
                    };
                    let (Ok(index), Ok(total)) = (n_tok.parse::<u32>(), total_tok.parse::<u32>())
                    else {
                        discard_header!("malformed SHRED fragment index/total");
                    };
                    let Ok(body_len) = len_tok.parse::<usize>() else {
                        return Err(TunnelError::Protocol(
                            "SHRED frame missing valid body_len".into(),
                        ));
                    };
                    let frame_end = sep_pos + self.separator.len() + body_len;
                    if src.len() < frame_end {
                        return Ok(None);
                    }
                    let body = src[sep_pos + self.separator.len()..frame_end].to_vec();
                    let digest_ok = sha1_hex(&body).eq_ignore_ascii_case(sha1_tok)
                        && sha512_hex(&body).eq_ignore_ascii_case(sha512_tok);
                    src.advance(frame_end);
                    if !digest_ok {
                        tracing::warn!(%id, "digest mismatch on SHRED fragment, discarding");
                        continue;
                    }
                    return Ok(Some(Frame::Shred {
                        id,
                        port,
                        body,
                        index,
                        total,
                    }));
                }
                other => {
                    discard_header!(packet_type = other, "unknown packet type");
                }
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = TunnelError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), TunnelError> {
        match item {
            Frame::Auth { secret, ports } => {
                let ports = ports
                    .iter()
                    .map(u16::to_string)
                    .collect::<Vec<_>>()
                    .join(";");
                dst.put_slice(format!("AUTH {secret} {ports}").as_bytes());
                dst.put_slice(&self.separator);
            }
            Frame::Close { id } => {
                dst.put_slice(format!("CLOSE {id}").as_bytes());
                dst.put_slice(&self.separator);
            }
            Frame::Data { id, port, body } => {
                let sha1 = sha1_hex(&body);
                let sha512 = sha512_hex(&body);
                let header = match port {
                    Some(p) => format!("DATA {id} {p} {sha1} {sha512} {}", body.len()),
                    None => format!("DATA {id} {sha1} {sha512} {}", body.len()),
                };
                dst.put_slice(header.as_bytes());
                dst.put_slice(&self.separator);
                dst.put_slice(&body);
            }
            Frame::Shred {
                id,
                port,
                body,
                index,
                total,
            } => {
                let sha1 = sha1_hex(&body);
                let sha512 = sha512_hex(&body);
                let header = match port {
                    Some(p) => {
                        format!("SHRED {id} {p} {sha1} {sha512} {} {index} {total}", body.len())
                    }
                    None => format!("SHRED {id} {sha1} {sha512} {} {index} {total}", body.len()),
                };
                dst.put_slice(header.as_bytes());
                dst.put_slice(&self.separator);
                dst.put_slice(&body);
            }
        }
        Ok(())
    }
}
