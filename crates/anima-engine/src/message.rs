use serde_json::Value;

/// The shapes a payload flowing between nodes can take: plain text, a model
/// response, or a skill result. Every consumer normalizes through
/// [`Message::from_value`] — nodes never sniff shapes themselves.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Text(String),
    LlmResponse { content: String },
    SkillResult {
        success: bool,
        output: String,
        error: Option<String>,
    },
}

impl Message {
    /// The single normalizing adapter. Recognizes plain strings, objects
    /// with a `content` or `response` field, and `{success, output, error}`
    /// skill results; anything else is rendered as text.
    pub fn from_value(value: &Value) -> Message {
        match value {
            Value::String(s) => Message::Text(s.clone()),
            Value::Object(map) => {
                if let Some(success) = map.get("success").and_then(Value::as_bool) {
                    return Message::SkillResult {
                        success,
                        output: map
                            .get("output")
                            .map(render_text)
                            .unwrap_or_default(),
                        error: map.get("error").and_then(Value::as_str).map(String::from),
                    };
                }
                if let Some(content) = map.get("content") {
                    return Message::LlmResponse {
                        content: render_text(content),
                    };
                }
                if let Some(response) = map.get("response") {
                    return Message::from_value(response);
                }
                Message::Text(Value::Object(map.clone()).to_string())
            }
            other => Message::Text(render_text(other)),
        }
    }

    /// The textual payload, whatever the shape. A failed skill result reads
    /// as its error.
    pub fn text(&self) -> &str {
        match self {
            Message::Text(s) => s,
            Message::LlmResponse { content } => content,
            Message::SkillResult { success, output, error } => {
                if *success {
                    output
                } else {
                    error.as_deref().unwrap_or(output)
                }
            }
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Message::SkillResult { success: false, .. })
    }
}

fn render_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Truthiness used by routing nodes: booleans as-is, numbers nonzero,
/// strings non-empty and not "false", skill results by their success flag.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Array(a) => !a.is_empty(),
        Value::Object(map) => map
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(true),
    }
}
