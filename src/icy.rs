//! ICY (Shoutcast-style) metadata interleaving.
//!
//! Clients that send `Icy-MetaData: 1` receive a metadata block every
//! `metaint` bytes of audio payload: a length byte (block length / 16)
//! followed by that many 16-byte units of `StreamTitle='...';` padded with
//! NULs. A zero length byte means "no change" and costs one byte.
//!
//! The interleaver is pure byte accounting over the audio stream; the
//! audio itself is passed through untouched, so a client that ignores the
//! convention still gets a valid bitstream between blocks.

use bytes::{BufMut, Bytes, BytesMut};

/// Metadata blocks are sized in 16-byte units with a one-byte length
/// prefix, so the text can never exceed 255 * 16 bytes.
const MAX_METADATA_LEN: usize = 255 * 16;

/// Stateful ICY metadata injector for one listener connection.
pub struct IcyInterleaver {
    metaint: usize,
    /// Audio bytes remaining until the next metadata block.
    until_meta: usize,
    /// Title last sent to this client; unchanged titles emit empty blocks.
    last_title: Option<String>,
}

impl IcyInterleaver {
    /// Creates an interleaver emitting a block every `metaint` audio bytes.
    ///
    /// # Panics
    ///
    /// Panics if `metaint` is zero (rejected earlier by config validation).
    pub fn new(metaint: usize) -> Self {
        assert!(metaint > 0, "icy metaint must be nonzero");
        Self {
            metaint,
            until_meta: metaint,
            last_title: None,
        }
    }

    /// Interleaves metadata blocks into `audio`, returning the wire bytes
    /// for this chunk. `title` is the current `StreamTitle` text.
    pub fn interleave(&mut self, audio: &[u8], title: &str) -> Bytes {
        let mut out = BytesMut::with_capacity(audio.len() + 64);
        let mut rest = audio;

        while !rest.is_empty() {
            let take = self.until_meta.min(rest.len());
            out.put_slice(&rest[..take]);
            rest = &rest[take..];
            self.until_meta -= take;

            if self.until_meta == 0 {
                self.put_metadata_block(&mut out, title);
                self.until_meta = self.metaint;
            }
        }

        out.freeze()
    }

    fn put_metadata_block(&mut self, out: &mut BytesMut, title: &str) {
        if self.last_title.as_deref() == Some(title) {
            out.put_u8(0);
            return;
        }

        let text = format_stream_title(title);
        let padded_len = text.len().div_ceil(16) * 16;
        out.put_u8((padded_len / 16) as u8);
        out.put_slice(text.as_bytes());
        out.put_bytes(0, padded_len - text.len());

        self.last_title = Some(title.to_string());
    }
}

/// Builds the `StreamTitle='...';` text, dropping quote characters that
/// would break the delimiter and truncating to the representable length.
fn format_stream_title(title: &str) -> String {
    let cleaned: String = title.chars().filter(|&c| c != '\'').collect();
    let mut text = format!("StreamTitle='{cleaned}';");
    if text.len() > MAX_METADATA_LEN {
        // Truncate the title, not the delimiter
        let overshoot = text.len() - MAX_METADATA_LEN;
        let keep = cleaned.len().saturating_sub(overshoot);
        let truncated: String = cleaned.chars().take(keep).collect();
        text = format!("StreamTitle='{truncated}';");
    }
    text
}
