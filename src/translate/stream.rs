use serde::Deserialize;
use tracing::debug;

/// One line of an ollama `/api/chat` stream.
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChatDelta>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Incremental decoder for newline-delimited JSON chat chunks.
///
/// Bytes are buffered until a newline arrives, so lines (and UTF-8 sequences)
/// split across network chunks are reassembled. Lines that do not parse are
/// dropped.
#[derive(Debug, Default)]
pub struct ChatStreamDecoder {
    buffer: Vec<u8>,
}

impl ChatStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw body bytes, returning the content deltas of every line
    /// completed by them, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut deltas = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(delta) = decode_line(&line) {
                deltas.push(delta);
            }
        }
        deltas
    }

    /// Decode whatever is left once the stream has closed.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest)
    }
}

fn decode_line(line: &[u8]) -> Option<String> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_slice::<ChatChunk>(line) {
        Ok(chunk) => {
            if let Some(error) = chunk.error {
                debug!("Stream reported error: {}", error);
            }
            chunk
                .message
                .and_then(|m| m.content)
                .filter(|content| !content.is_empty())
        }
        Err(e) => {
            debug!("Skipping undecodable stream line: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_complete_lines() {
        let mut decoder = ChatStreamDecoder::new();
        let deltas = decoder.push(
            b"{\"message\":{\"role\":\"assistant\",\"content\":\"Bon\"},\"done\":false}\n\
              {\"message\":{\"role\":\"assistant\",\"content\":\"jour\"},\"done\":false}\n\
              {\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
        );
        assert_eq!(deltas, vec!["Bon", "jour"]);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_reassembles_split_lines() {
        let mut decoder = ChatStreamDecoder::new();
        assert!(decoder.push(b"{\"message\":{\"con").is_empty());
        assert_eq!(decoder.push(b"tent\":\"Hallo\"}}\n{\"mess"), vec!["Hallo"]);
        assert_eq!(decoder.push(b"age\":{\"content\":\" Welt\"}}\n"), vec![" Welt"]);
    }

    #[test]
    fn test_reassembles_split_utf8() {
        let line = "{\"message\":{\"content\":\"こんにちは\"}}\n".as_bytes();
        let (head, tail) = line.split_at(25);

        let mut decoder = ChatStreamDecoder::new();
        assert!(decoder.push(head).is_empty());
        assert_eq!(decoder.push(tail), vec!["こんにちは"]);
    }

    #[test]
    fn test_skips_malformed_and_empty_lines() {
        let mut decoder = ChatStreamDecoder::new();
        let deltas = decoder.push(
            b"not json\n\n{\"message\":{\"content\":\"a\"}}\n{\"message\":\n{\"done\":true}\n{\"error\":\"boom\"}\n{\"message\":{\"content\":\"b\"}}\n",
        );
        assert_eq!(deltas, vec!["a", "b"]);
    }

    #[test]
    fn test_finish_decodes_unterminated_tail() {
        let mut decoder = ChatStreamDecoder::new();
        assert!(decoder.push(b"{\"message\":{\"content\":\"end\"}}").is_empty());
        assert_eq!(decoder.finish().as_deref(), Some("end"));
        assert_eq!(decoder.finish(), None);
    }
}
