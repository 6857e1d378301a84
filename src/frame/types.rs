use sha1::Sha1;
use sha2::{Digest, Sha512};

use crate::session::SessionId;

/// Default transmit-side fragmentation threshold (§4.5). A legacy MTU hint
/// from the source; with the `<body_len>`-carrying wire format (§4.2) it is
/// a tuning parameter, not a correctness requirement.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 384;

/// One application-layer message on the control channel (§4.1).
///
/// `END` is deliberately absent: spec.md §9 resolves the open question by
/// mandating that implementers neither accept nor emit it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Sent once by the starter immediately after dialing.
    Auth { secret: String, ports: Vec<u16> },
    /// A complete (unfragmented) payload for session `id`. `port` is set by
    /// the redirector (telling the starter which backend to open) and
    /// absent on frames travelling starter → redirector.
    Data {
        id: SessionId,
        port: Option<u16>,
        body: Vec<u8>,
    },
    /// One fragment of a payload too large for a single `Data` frame.
    /// `index` is 1-based; `total` is the declared fragment count.
    Shred {
        id: SessionId,
        port: Option<u16>,
        body: Vec<u8>,
        index: u32,
        total: u32,
    },
    /// Either peer tells the other that session `id` is finished.
    Close { id: SessionId },
}

/// Lowercase hex SHA-1 of `body`, recomputed on both encode and decode per
/// §4.1's dual-digest integrity check.
pub fn sha1_hex(body: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

/// Lowercase hex SHA-512 of `body`. Strictly stronger than the SHA-1
/// alongside it; kept for on-wire compatibility with the dual-digest format
/// (§4.1) rather than for any added security margin.
pub fn sha512_hex(body: &[u8]) -> String {
    let mut hasher = Sha512::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

/// Splits a payload read from a socket into the frame(s) needed to carry
/// it: a single `Data` frame if it fits under `max_packet_size`, otherwise
/// a sequence of `Shred` frames with 1-based indices and a shared total
/// (§4.5). `port` is `Some` only on frames travelling redirector → starter.
pub fn frames_for_payload(
    id: SessionId,
    port: Option<u16>,
    body: Vec<u8>,
    max_packet_size: usize,
) -> Vec<Frame> {
    if body.len() <= max_packet_size || max_packet_size == 0 {
        return vec![Frame::Data { id, port, body }];
    }

    let chunks: Vec<&[u8]> = body.chunks(max_packet_size).collect();
    let total = chunks.len() as u32;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| Frame::Shred {
            id,
            port,
            body: chunk.to_vec(),
            index: (i + 1) as u32,
            total,
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn digests_are_stable_and_lowercase() {
        let body = b"hello tunnel";
        let sha1 = sha1_hex(body);
        let sha512 = sha512_hex(body);
        assert_eq!(sha1.len(), 40);
        assert_eq!(sha512.len(), 128);
        assert_eq!(sha1, sha1.to_ascii_lowercase());
        assert_eq!(sha512, sha512.to_ascii_lowercase());
        assert_eq!(sha1, sha1_hex(body));
    }

    #[test]
    fn small_payload_becomes_one_data_frame() {
        let id = SessionId::new();
        let frames = frames_for_payload(id, Some(80), b"short".to_vec(), 384);
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Frame::Data { .. }));
    }

    #[test]
    fn oversize_payload_splits_into_shreds() {
        let id = SessionId::new();
        let body = vec![9u8; 1024];
        let frames = frames_for_payload(id, None, body.clone(), 384);
        assert_eq!(frames.len(), 3);
        let mut rebuilt = Vec::new();
        for (i, frame) in frames.iter().enumerate() {
            match frame {
                Frame::Shred {
                    index,
                    total,
                    body,
                    ..
                } => {
                    assert_eq!(*index, (i + 1) as u32);
                    assert_eq!(*total, 3);
                    rebuilt.extend(body);
                }
                _ => panic!("expected Shred"),
            }
        }
        assert_eq!(rebuilt, body);
        let sizes: Vec<usize> = frames
            .iter()
            .map(|f| match f {
                Frame::Shred { body, .. } => body.len(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(sizes, vec![384, 384, 256]);
    }
}
