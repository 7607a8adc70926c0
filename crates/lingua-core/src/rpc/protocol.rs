//! Worker protocol types and framing.
//!
//! Every message is a 4-byte big-endian length prefix followed by a UTF-8
//! JSON payload.
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! Requests are `{id, name, args}`, responses `{id, result}` or
//! `{id, error: {message, stack}}`.

use crate::config::WorkerConfig;
use crate::error::{LinguaError, Result};
use crate::fetch::descriptor::LocalModel;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Arguments of a `translate` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslateRequest {
    pub from: String,
    pub to: String,
    pub text: String,
    #[serde(default)]
    pub html: bool,
}

/// Result of a `translate` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslateResponse {
    pub target: TranslatedText,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatedText {
    pub text: String,
}

impl TranslateResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            target: TranslatedText { text: text.into() },
        }
    }
}

/// The operations a worker understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "args", rename_all = "camelCase")]
pub enum WorkerCall {
    /// Load the given models. Pivot routes pass both hops.
    Initialize { models: Vec<LocalModel> },
    Translate(TranslateRequest),
    Dispose,
}

impl WorkerCall {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerCall::Initialize { .. } => "initialize",
            WorkerCall::Translate(_) => "translate",
            WorkerCall::Dispose => "dispose",
        }
    }

    /// `name(args)` with the arguments truncated, for error messages.
    pub fn describe(&self) -> String {
        let args = match self {
            WorkerCall::Initialize { models } => serde_json::to_string(models),
            WorkerCall::Translate(request) => serde_json::to_string(request),
            WorkerCall::Dispose => Ok(String::new()),
        }
        .unwrap_or_default();

        let max = WorkerConfig::DESCRIPTION_MAX_CHARS;
        if args.chars().count() > max {
            let truncated: String = args.chars().take(max).collect();
            format!("{}({}…)", self.name(), truncated)
        } else {
            format!("{}({})", self.name(), args)
        }
    }
}

/// A call tagged with its correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerRequest {
    pub id: u64,
    pub call: WorkerCall,
}

impl WorkerRequest {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut value = serde_json::to_value(&self.call)?;
        if let Some(object) = value.as_object_mut() {
            object.insert("id".to_string(), self.id.into());
        }
        Ok(serde_json::to_vec(&value)?)
    }

    /// Decode a request frame.
    ///
    /// On failure the id is returned when it could be read, so the worker can
    /// still answer with an error.
    pub fn from_slice(bytes: &[u8]) -> std::result::Result<Self, (Option<u64>, LinguaError)> {
        let value: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| {
            (
                None,
                LinguaError::Protocol {
                    message: format!("request is not valid JSON: {}", e),
                },
            )
        })?;
        let id = value.get("id").and_then(|id| id.as_u64());
        let request_id = id.ok_or_else(|| {
            (
                None,
                LinguaError::Protocol {
                    message: "request has no numeric id".to_string(),
                },
            )
        })?;
        let call = serde_json::from_value(value).map_err(|e| {
            (
                id,
                LinguaError::Protocol {
                    message: format!("unknown or malformed call: {}", e),
                },
            )
        })?;
        Ok(Self {
            id: request_id,
            call,
        })
    }
}

/// Error reported by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// A worker's reply to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

impl WorkerResponse {
    pub fn success(id: u64, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: u64, message: impl Into<String>, stack: Option<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(RemoteError {
                message: message.into(),
                stack,
            }),
        }
    }

    /// The outcome; a missing or null result counts as success with `null`.
    pub fn into_outcome(self) -> std::result::Result<serde_json::Value, RemoteError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(serde_json::Value::Null)),
        }
    }
}

/// Read a length-prefixed frame.
///
/// Returns `None` on clean EOF (peer closed the channel).
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > WorkerConfig::MAX_MESSAGE_SIZE {
        return Err(LinguaError::Protocol {
            message: format!(
                "message size {} exceeds maximum {}",
                len,
                WorkerConfig::MAX_MESSAGE_SIZE
            ),
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write a length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > WorkerConfig::MAX_MESSAGE_SIZE {
        return Err(LinguaError::Protocol {
            message: format!(
                "message size {} exceeds maximum {}",
                payload.len(),
                WorkerConfig::MAX_MESSAGE_SIZE
            ),
        });
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
