//! Multi-candidate fan-out.
//!
//! Some providers stream an array of parallel candidates per frame
//! (`choices[]` with n > 1). When the manifest sets
//! `streaming.fan_out_path`, this operator either pins the stream to
//! candidate 0 (default) or expands every candidate element into its own
//! frame. In both modes the emitted frame keeps the original shape, with
//! the fan-out array reduced to a single element, so downstream selectors
//! that index `[0]` keep working per candidate.
//!
//! Fan-out applies to streaming responses only; the one-shot mapper always
//! reads candidate 0.

use futures::StreamExt;
use serde_json::Value;

use crate::manifest::schema::StreamingSpec;
use crate::pipeline::PipelineError;
use crate::util::JsonPath;
use crate::BoxStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    PrimaryOnly,
    Expand,
}

/// Candidate-array handling stage.
pub struct FanOut {
    path: JsonPath,
    mode: Mode,
}

impl FanOut {
    /// Returns `None` when the manifest declares no fan-out path; the stage
    /// is then skipped entirely.
    pub fn from_spec(spec: &StreamingSpec, expand: bool) -> crate::Result<Option<Self>> {
        let Some(ref raw) = spec.fan_out_path else {
            return Ok(None);
        };
        let path = JsonPath::parse(raw).map_err(|e| {
            PipelineError::Config(format!("streaming.fan_out_path '{raw}': {e}"))
        })?;
        Ok(Some(Self {
            path,
            mode: if expand { Mode::Expand } else { Mode::PrimaryOnly },
        }))
    }

    pub fn apply(self, input: BoxStream<Value>) -> BoxStream<Value> {
        let Self { path, mode } = self;
        let stream = input.flat_map(move |item| {
            let out: Vec<crate::Result<Value>> = match item {
                Ok(frame) => match path.get(&frame) {
                    Some(Value::Array(candidates)) if !candidates.is_empty() => {
                        let picked: Vec<Value> = match mode {
                            Mode::PrimaryOnly => vec![candidates[0].clone()],
                            Mode::Expand => candidates.clone(),
                        };
                        picked
                            .into_iter()
                            .map(|candidate| {
                                let mut narrowed = frame.clone();
                                match path.set(&mut narrowed, Value::Array(vec![candidate])) {
                                    Ok(()) => Ok(narrowed),
                                    // Selector-addressable paths are key
                                    // paths; an index path cannot narrow, so
                                    // pass the frame through unchanged.
                                    Err(_) => Ok(frame.clone()),
                                }
                            })
                            .collect()
                    }
                    // No array at the path: frame passes through untouched.
                    _ => vec![Ok(frame)],
                },
                Err(e) => vec![Err(e)],
            };
            futures::stream::iter(out)
        });
        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::schema::DecoderKind;
    use serde_json::json;

    fn spec(fan_out_path: Option<&str>) -> StreamingSpec {
        StreamingSpec {
            decoder: DecoderKind::Sse,
            content_path: Some("$.choices[0].delta.content".into()),
            thinking_path: None,
            tool_call_path: None,
            role_path: None,
            finish_reason_path: None,
            usage_path: None,
            fan_out_path: fan_out_path.map(String::from),
        }
    }

    async fn run(op: FanOut, frames: Vec<Value>) -> Vec<Value> {
        let input: BoxStream<Value> =
            Box::pin(futures::stream::iter(frames.into_iter().map(Ok)));
        op.apply(input).map(|f| f.unwrap()).collect().await
    }

    #[tokio::test]
    async fn default_mode_pins_candidate_zero() {
        let op = FanOut::from_spec(&spec(Some("$.choices")), false)
            .unwrap()
            .unwrap();
        let frames = run(
            op,
            vec![json!({"choices": [
                {"index": 0, "delta": {"content": "a"}},
                {"index": 1, "delta": {"content": "b"}},
            ]})],
        )
        .await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["choices"].as_array().unwrap().len(), 1);
        assert_eq!(frames[0]["choices"][0]["delta"]["content"], "a");
    }

    #[tokio::test]
    async fn expand_mode_emits_one_frame_per_candidate() {
        let op = FanOut::from_spec(&spec(Some("$.choices")), true)
            .unwrap()
            .unwrap();
        let frames = run(
            op,
            vec![json!({"choices": [
                {"index": 0, "delta": {"content": "a"}},
                {"index": 1, "delta": {"content": "b"}},
            ]})],
        )
        .await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["choices"][0]["index"], 0);
        assert_eq!(frames[1]["choices"][0]["index"], 1);
    }

    #[tokio::test]
    async fn absent_path_passes_frames_through() {
        let op = FanOut::from_spec(&spec(Some("$.choices")), false)
            .unwrap()
            .unwrap();
        let frames = run(op, vec![json!({"usage": {"total_tokens": 5}})]).await;
        assert_eq!(frames, vec![json!({"usage": {"total_tokens": 5}})]);
    }

    #[test]
    fn no_fan_out_path_skips_stage() {
        assert!(FanOut::from_spec(&spec(None), false).unwrap().is_none());
    }
}
