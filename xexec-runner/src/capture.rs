use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::warn;
use xexec_core::{ChunkSource, OutputChunk};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Lossy UTF-8 decoding across read boundaries.
///
/// A multi-byte sequence split between two reads is held back until the rest
/// arrives; genuinely invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            let err = match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(err) => err,
            };

            let valid = err.valid_up_to();
            out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
            match err.error_len() {
                Some(len) => {
                    out.push(char::REPLACEMENT_CHARACTER);
                    self.pending.drain(..valid + len);
                }
                None => {
                    // incomplete tail, wait for more bytes
                    self.pending.drain(..valid);
                    return out;
                }
            }
        }
    }

    pub(crate) fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Read a child stream until EOF, forwarding decoded chunks in emission order
pub(crate) fn spawn_reader<R>(
    mut reader: R,
    source: ChunkSource,
    tx: UnboundedSender<OutputChunk>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut decoder = Utf8Decoder::default();

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let text = decoder.push(&buf[..n]);
                    if !text.is_empty() && tx.send(OutputChunk::new(source, text)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!(source = ?source, error = %e, "Failed reading process output");
                    break;
                }
            }
        }

        let rest = decoder.finish();
        if !rest.is_empty() {
            let _ = tx.send(OutputChunk::new(source, rest));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_decoder_passes_ascii_through() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.push(b"hello\n"), "hello\n");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoder_joins_split_multibyte_sequence() {
        let bytes = "héllo".as_bytes();
        // 'é' is two bytes starting at index 1
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.push(&bytes[..2]), "h");
        assert_eq!(decoder.push(&bytes[2..]), "éllo");
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.push(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_decoder_flushes_truncated_tail_on_finish() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.push(b"ok\xe2\x82"), "ok");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    #[tokio::test]
    async fn test_reader_forwards_stream_contents() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let data: &'static [u8] = b"first line\nsecond line\n";
        spawn_reader(data, ChunkSource::Stdout, tx).await.unwrap();

        let mut text = String::new();
        while let Some(chunk) = rx.recv().await {
            assert_eq!(chunk.source, ChunkSource::Stdout);
            text.push_str(&chunk.text);
        }
        assert_eq!(text, "first line\nsecond line\n");
    }
}
