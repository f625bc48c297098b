//! Canonical request → provider wire request.
//!
//! Pure given its inputs: the same `(manifest, target, request, key)` always
//! produces the same bytes (serde_json orders object keys, so bodies are
//! byte-stable where the wire protocol tolerates reordering).

use serde_json::{json, Map, Value};

use crate::manifest::schema::{AuthScheme, ProtocolManifest, ToolDialect};
use crate::taxonomy::ErrorKind;
use crate::types::message::{ContentBlock, MediaSource, Message, MessageContent, Role};
use crate::types::request::CanonicalRequest;
use crate::types::target::ProviderTarget;
use crate::types::tool::{ToolChoice, ToolDef};
use crate::util::JsonPath;
use crate::{Error, Result};

/// A fully compiled HTTP request, ready for the transport.
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl WireRequest {
    /// Deterministic serialized body.
    pub fn body_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.body)?)
    }
}

/// Compile a canonical request for one operation against one target.
///
/// `api_key` is the already-resolved credential (see
/// [`crate::transport::resolve_api_key`]); `None` is only legal for
/// `auth.scheme = none`.
pub fn compile_request(
    manifest: &ProtocolManifest,
    target: &ProviderTarget,
    request: &CanonicalRequest,
    operation: &str,
    api_key: Option<&str>,
) -> Result<WireRequest> {
    let path = manifest.operation_path(operation).ok_or_else(|| {
        crate::manifest::ManifestError::invalid(
            format!("endpoint.paths.{operation}"),
            "operation not declared by manifest",
        )
    })?;

    let base_url = target
        .base_url
        .as_deref()
        .unwrap_or(&manifest.endpoint.base_url)
        .trim_end_matches('/');
    let mut url = format!("{base_url}{}", path.replace("{model}", &target.model_id));

    let rules = &manifest.request;
    let mut body = Value::Object(Map::new());

    if !rules.model_key.is_empty() {
        set_field(&mut body, &rules.model_key, json!(target.model_id))?;
    }

    // System lift (Anthropic style): system turns become a top-level field.
    let mut messages: Vec<&Message> = request.messages.iter().collect();
    if let Some(ref system_key) = rules.system_key {
        let system_text: Vec<String> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_text())
            .collect();
        if !system_text.is_empty() {
            set_field(&mut body, system_key, json!(system_text.join("\n")))?;
        }
        messages.retain(|m| m.role != Role::System);
    }

    let wire_messages: Vec<Value> = messages
        .iter()
        .map(|m| compile_message(m, manifest))
        .collect::<Result<_>>()?;
    set_field(&mut body, &rules.messages_key, Value::Array(wire_messages))?;

    compile_sampling(&mut body, manifest, request)?;

    if !request.tools.is_empty() {
        let tools = compile_tools(&request.tools, rules.tool_dialect);
        set_field(&mut body, "tools", tools)?;
        if let Some(ref choice) = request.tool_choice {
            let (key, value) = compile_tool_choice(choice, rules.tool_dialect);
            set_field(&mut body, key, value)?;
        }
    }

    if request.stream && manifest.capabilities.streaming {
        set_field(&mut body, &rules.stream_key, json!(true))?;
    }

    // Extensions merge last so callers can override anything above.
    for (key, value) in &request.extensions {
        set_field(&mut body, key, value.clone())?;
    }

    let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
    attach_auth(manifest, api_key, &mut headers, &mut url)?;

    Ok(WireRequest {
        method: "POST".to_string(),
        url,
        headers,
        body,
    })
}

fn set_field(body: &mut Value, path: &str, value: Value) -> Result<()> {
    let compiled = JsonPath::parse(path)
        .map_err(|e| crate::manifest::ManifestError::invalid(path.to_string(), e.to_string()))?;
    compiled
        .set(body, value)
        .map_err(|e| crate::manifest::ManifestError::invalid(path.to_string(), e.to_string()))?;
    Ok(())
}

fn wire_role(manifest: &ProtocolManifest, role: Role) -> String {
    let canonical = match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    manifest
        .request
        .role_map
        .get(canonical)
        .cloned()
        .unwrap_or_else(|| canonical.to_string())
}

fn compile_message(message: &Message, manifest: &ProtocolManifest) -> Result<Value> {
    let dialect = manifest.request.tool_dialect;
    let mut out = Map::new();
    out.insert("role".to_string(), json!(wire_role(manifest, message.role)));

    match (&message.content, dialect) {
        (MessageContent::Text(text), ToolDialect::Gemini) => {
            out.insert("parts".to_string(), json!([{"text": text}]));
        }
        (MessageContent::Text(text), _) => {
            out.insert("content".to_string(), json!(text));
        }
        (MessageContent::Blocks(blocks), _) => {
            let rendered: Vec<Value> = blocks
                .iter()
                .map(|b| compile_block(b, dialect))
                .collect::<Result<_>>()?;
            let key = if dialect == ToolDialect::Gemini { "parts" } else { "content" };
            out.insert(key.to_string(), Value::Array(rendered));
        }
    }

    if !message.tool_calls.is_empty() {
        match dialect {
            ToolDialect::Openai => {
                let calls: Vec<Value> = message
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                out.insert("tool_calls".to_string(), Value::Array(calls));
            }
            ToolDialect::Anthropic => {
                // Tool use rides in the content block list.
                let mut blocks = match out.remove("content") {
                    Some(Value::Array(b)) => b,
                    Some(Value::String(s)) if !s.is_empty() => {
                        vec![json!({"type": "text", "text": s})]
                    }
                    _ => Vec::new(),
                };
                for tc in &message.tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.name,
                        "input": tc.arguments,
                    }));
                }
                out.insert("content".to_string(), Value::Array(blocks));
            }
            ToolDialect::Gemini => {
                let parts: Vec<Value> = message
                    .tool_calls
                    .iter()
                    .map(|tc| json!({"functionCall": {"name": tc.name, "args": tc.arguments}}))
                    .collect();
                out.insert("parts".to_string(), Value::Array(parts));
            }
        }
    }

    if let Some(ref id) = message.tool_call_id {
        match dialect {
            ToolDialect::Openai => {
                out.insert("tool_call_id".to_string(), json!(id));
            }
            ToolDialect::Anthropic => {
                // Tool results are user-role content blocks on the wire.
                let content = out
                    .remove("content")
                    .unwrap_or_else(|| Value::String(String::new()));
                out.insert("role".to_string(), json!("user"));
                out.insert(
                    "content".to_string(),
                    json!([{"type": "tool_result", "tool_use_id": id, "content": content}]),
                );
            }
            ToolDialect::Gemini => {
                let content = out.remove("content").unwrap_or(Value::Null);
                out.insert(
                    "parts".to_string(),
                    json!([{"functionResponse": {"name": id, "response": {"content": content}}}]),
                );
            }
        }
    }

    Ok(Value::Object(out))
}

fn compile_block(block: &ContentBlock, dialect: ToolDialect) -> Result<Value> {
    let rendered = match (block, dialect) {
        (ContentBlock::Text { text }, ToolDialect::Gemini) => json!({"text": text}),
        (ContentBlock::Text { text }, _) => json!({"type": "text", "text": text}),

        (ContentBlock::Image { source }, ToolDialect::Openai) => {
            let url = match source {
                MediaSource::Url { url } => url.clone(),
                MediaSource::Base64 { data, media_type } => format!(
                    "data:{};base64,{data}",
                    media_type.as_deref().unwrap_or("image/png")
                ),
            };
            json!({"type": "image_url", "image_url": {"url": url}})
        }
        (ContentBlock::Image { source }, ToolDialect::Anthropic) => match source {
            MediaSource::Url { url } => {
                json!({"type": "image", "source": {"type": "url", "url": url}})
            }
            MediaSource::Base64 { data, media_type } => json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": media_type.as_deref().unwrap_or("image/png"),
                    "data": data,
                }
            }),
        },
        (ContentBlock::Image { source }, ToolDialect::Gemini) => match source {
            MediaSource::Base64 { data, media_type } => json!({
                "inline_data": {
                    "mime_type": media_type.as_deref().unwrap_or("image/png"),
                    "data": data,
                }
            }),
            MediaSource::Url { url } => json!({"file_data": {"file_uri": url}}),
        },

        (ContentBlock::Audio { source }, _) => match source {
            MediaSource::Base64 { data, media_type } => json!({
                "type": "input_audio",
                "input_audio": {
                    "data": data,
                    "format": media_type.as_deref().unwrap_or("audio/wav"),
                }
            }),
            MediaSource::Url { url } => json!({"type": "audio_url", "audio_url": {"url": url}}),
        },
    };
    Ok(rendered)
}

fn compile_sampling(
    body: &mut Value,
    manifest: &ProtocolManifest,
    request: &CanonicalRequest,
) -> Result<()> {
    let param_map = &manifest.request.param_map;
    let path_for = |canonical: &str| -> String {
        param_map
            .get(canonical)
            .cloned()
            .unwrap_or_else(|| canonical.to_string())
    };

    if let Some(t) = request.sampling.temperature {
        set_field(body, &path_for("temperature"), json!(t))?;
    }
    if let Some(p) = request.sampling.top_p {
        set_field(body, &path_for("top_p"), json!(p))?;
    }
    if let Some(n) = request.sampling.max_tokens {
        set_field(body, &path_for("max_tokens"), json!(n))?;
    }
    if !request.sampling.stop.is_empty() {
        set_field(body, &path_for("stop"), json!(request.sampling.stop))?;
    }
    Ok(())
}

fn compile_tools(tools: &[ToolDef], dialect: ToolDialect) -> Value {
    match dialect {
        ToolDialect::Openai => Value::Array(
            tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.json_schema,
                        }
                    })
                })
                .collect(),
        ),
        ToolDialect::Anthropic => Value::Array(
            tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.json_schema,
                    })
                })
                .collect(),
        ),
        ToolDialect::Gemini => json!([{
            "functionDeclarations": tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.json_schema,
                    })
                })
                .collect::<Vec<_>>()
        }]),
    }
}

fn compile_tool_choice(choice: &ToolChoice, dialect: ToolDialect) -> (&'static str, Value) {
    match dialect {
        ToolDialect::Openai => (
            "tool_choice",
            match choice {
                ToolChoice::Auto => json!("auto"),
                ToolChoice::None => json!("none"),
                ToolChoice::Required => json!("required"),
                ToolChoice::Tool { name } => {
                    json!({"type": "function", "function": {"name": name}})
                }
            },
        ),
        ToolDialect::Anthropic => (
            "tool_choice",
            match choice {
                ToolChoice::Auto => json!({"type": "auto"}),
                ToolChoice::None => json!({"type": "none"}),
                ToolChoice::Required => json!({"type": "any"}),
                ToolChoice::Tool { name } => json!({"type": "tool", "name": name}),
            },
        ),
        ToolDialect::Gemini => (
            "tool_config",
            match choice {
                ToolChoice::Auto => json!({"function_calling_config": {"mode": "AUTO"}}),
                ToolChoice::None => json!({"function_calling_config": {"mode": "NONE"}}),
                ToolChoice::Required => json!({"function_calling_config": {"mode": "ANY"}}),
                ToolChoice::Tool { name } => json!({
                    "function_calling_config": {
                        "mode": "ANY",
                        "allowed_function_names": [name],
                    }
                }),
            },
        ),
    }
}

fn attach_auth(
    manifest: &ProtocolManifest,
    api_key: Option<&str>,
    headers: &mut Vec<(String, String)>,
    url: &mut String,
) -> Result<()> {
    let auth = &manifest.auth;
    if auth.scheme == AuthScheme::None {
        return Ok(());
    }
    let key = api_key.ok_or_else(|| {
        Error::classified(
            ErrorKind::Authentication,
            format!(
                "no API key for provider '{}' (checked call, target, ${} and keyring)",
                manifest.id, auth.env_var
            ),
        )
    })?;

    match auth.scheme {
        AuthScheme::Bearer => {
            headers.push(("authorization".to_string(), format!("Bearer {key}")));
        }
        AuthScheme::Header => {
            let name = auth.header_name.as_deref().unwrap_or("x-api-key");
            let value = match auth.prefix.as_deref() {
                Some(prefix) => format!("{prefix}{key}"),
                None => key.to_string(),
            };
            headers.push((name.to_ascii_lowercase(), value));
        }
        AuthScheme::Query => {
            let param = auth.query_param.as_deref().unwrap_or("key");
            let sep = if url.contains('?') { '&' } else { '?' };
            url.push(sep);
            url.push_str(param);
            url.push('=');
            url.push_str(key);
        }
        AuthScheme::None => unreachable!(),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::schema::*;
    use std::collections::HashMap;

    fn manifest(dialect: ToolDialect) -> ProtocolManifest {
        ProtocolManifest {
            schema: None,
            id: "acme".into(),
            protocol_version: "1.0".into(),
            endpoint: EndpointSpec {
                base_url: "https://api.acme.test".into(),
                paths: HashMap::from([("chat".to_string(), "/v1/chat".to_string())]),
            },
            auth: AuthSpec {
                scheme: AuthScheme::Bearer,
                env_var: "ACME_API_KEY".into(),
                header_name: None,
                query_param: None,
                prefix: None,
            },
            capabilities: Capabilities {
                streaming: true,
                tools: true,
                ..Default::default()
            },
            request: RequestRules {
                tool_dialect: dialect,
                ..Default::default()
            },
            streaming: None,
            response_paths: None,
            error_mapping: None,
            rate_limit_headers: None,
        }
    }

    fn request() -> CanonicalRequest {
        CanonicalRequest::new(vec![Message::user("hi")])
    }

    #[test]
    fn bearer_auth_and_stream_flag() {
        let m = manifest(ToolDialect::Openai);
        let t = ProviderTarget::new("acme", "m-1");
        let wire =
            compile_request(&m, &t, &request().streaming(), "chat", Some("sk-test")).unwrap();
        assert_eq!(wire.method, "POST");
        assert_eq!(wire.url, "https://api.acme.test/v1/chat");
        assert!(wire
            .headers
            .iter()
            .any(|(k, v)| k == "authorization" && v == "Bearer sk-test"));
        assert_eq!(wire.body["stream"], true);
        assert_eq!(wire.body["model"], "m-1");
        assert_eq!(wire.body["messages"][0]["content"], "hi");
    }

    #[test]
    fn missing_key_is_authentication_error() {
        let m = manifest(ToolDialect::Openai);
        let t = ProviderTarget::new("acme", "m-1");
        let err = compile_request(&m, &t, &request(), "chat", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[test]
    fn query_auth_lands_in_url() {
        let mut m = manifest(ToolDialect::Gemini);
        m.auth.scheme = AuthScheme::Query;
        m.auth.query_param = Some("key".into());
        let t = ProviderTarget::new("acme", "m-1");
        let wire = compile_request(&m, &t, &request(), "chat", Some("k123")).unwrap();
        assert!(wire.url.ends_with("?key=k123"));
    }

    #[test]
    fn param_map_reroutes_max_tokens() {
        let mut m = manifest(ToolDialect::Gemini);
        m.request.param_map.insert(
            "max_tokens".to_string(),
            "generationConfig.maxOutputTokens".to_string(),
        );
        let t = ProviderTarget::new("acme", "m-1");
        let req = request().with_max_tokens(128);
        let wire = compile_request(&m, &t, &req, "chat", Some("k")).unwrap();
        assert_eq!(wire.body["generationConfig"]["maxOutputTokens"], 128);
        assert!(wire.body.get("max_tokens").is_none());
    }

    #[test]
    fn tool_dialects_serialize_distinctly() {
        let tool = ToolDef::new("get_weather")
            .with_description("weather lookup")
            .with_schema(serde_json::json!({"type": "object"}));
        let t = ProviderTarget::new("acme", "m-1");
        let req = request().with_tools(vec![tool]);

        let openai =
            compile_request(&manifest(ToolDialect::Openai), &t, &req, "chat", Some("k")).unwrap();
        assert_eq!(openai.body["tools"][0]["function"]["name"], "get_weather");

        let anthropic =
            compile_request(&manifest(ToolDialect::Anthropic), &t, &req, "chat", Some("k")).unwrap();
        assert_eq!(anthropic.body["tools"][0]["name"], "get_weather");
        assert!(anthropic.body["tools"][0]["input_schema"].is_object());

        let gemini =
            compile_request(&manifest(ToolDialect::Gemini), &t, &req, "chat", Some("k")).unwrap();
        assert_eq!(
            gemini.body["tools"][0]["functionDeclarations"][0]["name"],
            "get_weather"
        );
    }

    #[test]
    fn system_lift_moves_system_turns() {
        let mut m = manifest(ToolDialect::Anthropic);
        m.request.system_key = Some("system".into());
        let t = ProviderTarget::new("acme", "m-1");
        let req = CanonicalRequest::new(vec![
            Message::system("be brief"),
            Message::user("hi"),
        ]);
        let wire = compile_request(&m, &t, &req, "chat", Some("k")).unwrap();
        assert_eq!(wire.body["system"], "be brief");
        assert_eq!(wire.body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn deterministic_bytes() {
        let m = manifest(ToolDialect::Openai);
        let t = ProviderTarget::new("acme", "m-1");
        let req = request().with_temperature(0.7).with_max_tokens(64);
        let a = compile_request(&m, &t, &req, "chat", Some("k")).unwrap();
        let b = compile_request(&m, &t, &req, "chat", Some("k")).unwrap();
        assert_eq!(a.body_bytes().unwrap(), b.body_bytes().unwrap());
    }

    #[test]
    fn model_in_path_interpolates() {
        let mut m = manifest(ToolDialect::Gemini);
        m.endpoint.paths.insert(
            "chat".to_string(),
            "/v1beta/models/{model}:generateContent".to_string(),
        );
        m.request.model_key = String::new();
        let t = ProviderTarget::new("acme", "gemini-pro");
        let wire = compile_request(&m, &t, &request(), "chat", Some("k")).unwrap();
        assert!(wire.url.contains("/models/gemini-pro:generateContent"));
        assert!(wire.body.get("model").is_none());
    }
}
