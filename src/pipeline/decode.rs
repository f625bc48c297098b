//! Streaming decoders (bytes → JSON frames).
//!
//! Decoders know wire framing only; field meaning belongs to the selector.
//! Partial frames straddling chunk boundaries are kept as raw bytes in an
//! internal buffer and re-examined when more bytes arrive, so any byte-level
//! split of a valid stream yields the same frame sequence. Malformed JSON in
//! a data frame is a terminal error.

use bytes::Bytes;
use futures::{stream, StreamExt};
use serde_json::Value;

use crate::manifest::schema::DecoderKind;
use crate::pipeline::PipelineError;
use crate::BoxStream;

/// Byte-stream framing into JSON values.
pub trait Decoder: Send + Sync {
    fn decode(&self, input: BoxStream<Bytes>) -> BoxStream<Value>;
}

/// Build the decoder a manifest asks for.
pub fn decoder_for(kind: DecoderKind) -> Box<dyn Decoder> {
    match kind {
        DecoderKind::Sse => Box::new(SseDecoder { inject_event_type: false }),
        // Anthropic still speaks SSE framing; the event name on each frame
        // is authoritative, so it is injected as `type` when absent.
        DecoderKind::AnthropicSse => Box::new(SseDecoder { inject_event_type: true }),
        DecoderKind::Ndjson => Box::new(NdjsonDecoder),
    }
}

const DONE_SIGNAL: &str = "[DONE]";

/// One parsed SSE frame: optional event name plus joined data lines.
struct SseFrame {
    event: Option<String>,
    data: String,
}

fn parse_sse_frame(raw: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();
    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with(':') {
            continue; // comment / keepalive
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data_lines.join("\n"),
    })
}

/// Server-sent events decoder.
///
/// Frames split on blank lines; `data:` payloads parse as JSON; the
/// `[DONE]` sentinel ends the stream.
pub struct SseDecoder {
    /// Copy the SSE event name into the frame as `type` when the payload
    /// does not carry one (Anthropic event routing).
    inject_event_type: bool,
}

impl Decoder for SseDecoder {
    fn decode(&self, input: BoxStream<Bytes>) -> BoxStream<Value> {
        let inject = self.inject_event_type;

        // State: (input, byte buffer, finished). Bytes are buffered raw and
        // only converted per complete frame, so multi-byte characters split
        // across chunks survive.
        let stream = stream::unfold(
            (input, Vec::<u8>::new(), false),
            move |(mut input, mut buf, done)| async move {
                if done {
                    return None;
                }
                loop {
                    if let Some(idx) = find_frame_boundary(&buf) {
                        let frame_bytes: Vec<u8> = buf.drain(..idx.end).collect();
                        let raw = String::from_utf8_lossy(&frame_bytes[..idx.start]).into_owned();

                        let Some(frame) = parse_sse_frame(&raw) else {
                            continue;
                        };
                        if frame.data.trim() == DONE_SIGNAL {
                            return None;
                        }
                        match serde_json::from_str::<Value>(&frame.data) {
                            Ok(mut value) => {
                                if inject {
                                    if let (Some(event), Some(obj)) =
                                        (frame.event.as_ref(), value.as_object_mut())
                                    {
                                        obj.entry("type".to_string())
                                            .or_insert_with(|| Value::String(event.clone()));
                                    }
                                }
                                return Some((Ok(value), (input, buf, false)));
                            }
                            Err(e) => {
                                let err = PipelineError::MalformedFrame {
                                    detail: format!("invalid JSON in SSE data: {e}"),
                                };
                                return Some((Err(err.into()), (input, buf, true)));
                            }
                        }
                    }

                    match input.next().await {
                        Some(Ok(bytes)) => {
                            buf.extend_from_slice(&bytes);
                        }
                        Some(Err(e)) => return Some((Err(e), (input, buf, true))),
                        None => {
                            // EOF: examine whatever remains once.
                            if buf.is_empty() {
                                return None;
                            }
                            let raw = String::from_utf8_lossy(&buf).into_owned();
                            buf.clear();
                            let Some(frame) = parse_sse_frame(&raw) else {
                                return None;
                            };
                            if frame.data.trim() == DONE_SIGNAL {
                                return None;
                            }
                            match serde_json::from_str::<Value>(&frame.data) {
                                Ok(mut value) => {
                                    if inject {
                                        if let (Some(event), Some(obj)) =
                                            (frame.event.as_ref(), value.as_object_mut())
                                        {
                                            obj.entry("type".to_string())
                                                .or_insert_with(|| Value::String(event.clone()));
                                        }
                                    }
                                    return Some((Ok(value), (input, buf, true)));
                                }
                                Err(e) => {
                                    let err = PipelineError::MalformedFrame {
                                        detail: format!("invalid JSON in trailing SSE data: {e}"),
                                    };
                                    return Some((Err(err.into()), (input, buf, true)));
                                }
                            }
                        }
                    }
                }
            },
        );
        Box::pin(stream)
    }
}

struct Boundary {
    /// Frame content length.
    start: usize,
    /// Content plus delimiter length.
    end: usize,
}

/// Locate the first `\n\n` or `\r\n\r\n` frame boundary.
fn find_frame_boundary(buf: &[u8]) -> Option<Boundary> {
    let lf = buf.windows(2).position(|w| w == b"\n\n");
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) if b < a => Some(Boundary { start: b, end: b + 4 }),
        (Some(a), _) => Some(Boundary { start: a, end: a + 2 }),
        (None, Some(b)) => Some(Boundary { start: b, end: b + 4 }),
        (None, None) => None,
    }
}

/// Newline-delimited JSON decoder.
pub struct NdjsonDecoder;

impl Decoder for NdjsonDecoder {
    fn decode(&self, input: BoxStream<Bytes>) -> BoxStream<Value> {
        let stream = stream::unfold(
            (input, Vec::<u8>::new(), false),
            move |(mut input, mut buf, done)| async move {
                if done {
                    return None;
                }
                loop {
                    if let Some(idx) = buf.iter().position(|&b| b == b'\n') {
                        let line_bytes: Vec<u8> = buf.drain(..=idx).collect();
                        let line = String::from_utf8_lossy(&line_bytes);
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Value>(line) {
                            Ok(value) => return Some((Ok(value), (input, buf, false))),
                            Err(e) => {
                                let err = PipelineError::MalformedFrame {
                                    detail: format!("invalid NDJSON line: {e}"),
                                };
                                return Some((Err(err.into()), (input, buf, true)));
                            }
                        }
                    }

                    match input.next().await {
                        Some(Ok(bytes)) => buf.extend_from_slice(&bytes),
                        Some(Err(e)) => return Some((Err(e), (input, buf, true))),
                        None => {
                            if buf.is_empty() {
                                return None;
                            }
                            let line = String::from_utf8_lossy(&buf).into_owned();
                            buf.clear();
                            let line = line.trim();
                            if line.is_empty() {
                                return None;
                            }
                            match serde_json::from_str::<Value>(line) {
                                Ok(value) => return Some((Ok(value), (input, buf, true))),
                                Err(e) => {
                                    let err = PipelineError::MalformedFrame {
                                        detail: format!("invalid trailing NDJSON line: {e}"),
                                    };
                                    return Some((Err(err.into()), (input, buf, true)));
                                }
                            }
                        }
                    }
                }
            },
        );
        Box::pin(stream)
    }
}
