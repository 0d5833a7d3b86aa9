//! Text Protocol Codec — line framing, NUL handling, size ceiling.
//!
//! The wire format is asymmetric: client → server lines are read one
//! `recv`/`read` at a time and trimmed of a trailing `\n`/`\r\n` (no
//! server-side buffering across reads — `spec.md` §4.6 is explicit that
//! "the protocol assumes the client flushes one command per send");
//! server → client messages are NUL-terminated, with the trailing NUL
//! counted in the byte length, matching `original_source/server.c`'s
//! `send(sock, message, strlen(message) + 1, 0)`.
//!
//! Grounded in the teacher's `tokio_util::codec` usage in
//! `network/connection`, scaled down to this simpler, non-reassembling
//! framing.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Decodes inbound lines and encodes outbound NUL-terminated messages.
pub struct LineCodec {
    max_message_bytes: usize,
}

impl LineCodec {
    pub fn new(max_message_bytes: usize) -> Self {
        Self { max_message_bytes }
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let truncated = src.len() > self.max_message_bytes;
        let take = self.max_message_bytes.min(src.len());
        let chunk = src.split_to(take);
        // Whatever else arrived in the same read past the ceiling is not a
        // separate command under this protocol's model; drop it rather
        // than reinterpreting it as the start of the next one.
        src.clear();

        if truncated {
            tracing::warn!(len = chunk.len(), "inbound message truncated to size ceiling");
        }

        let text = String::from_utf8_lossy(&chunk);
        let trimmed = text.trim_end_matches(['\n', '\r']).to_string();
        Ok(Some(trimmed))
    }
}

impl Encoder<String> for LineCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + 1);
        dst.put(item.as_bytes());
        dst.put_u8(0);
        Ok(())
    }
}
