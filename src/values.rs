//! Self-validating value objects
//!
//! Identifiers, enumerations, and bounded strings used across the domain.
//! Every type here validates at construction and is immutable afterwards;
//! invalid values cannot exist.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length of a single text content block.
pub const MAX_TEXT_CONTENT_LEN: usize = 1_000_000;

/// Maximum length of a system prompt.
pub const MAX_SYSTEM_PROMPT_LEN: usize = 100_000;

/// Maximum length of a tool description.
pub const MAX_TOOL_DESCRIPTION_LEN: usize = 10_000;

static TOOL_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]{0,63}$").expect("valid pattern"));

static URI_SCHEME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").expect("valid pattern"));

/// Validation failures for value objects.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("value cannot be empty")]
    Empty,
    #[error("value exceeds maximum length of {max}")]
    TooLong { max: usize },
    #[error("invalid tool name: {0}")]
    InvalidToolName(String),
    #[error("resource URI must carry a scheme: {0}")]
    MissingScheme(String),
    #[error("unknown model identifier: {0}")]
    UnknownModel(String),
    #[error("unknown stop reason: {0}")]
    UnknownStopReason(String),
}

/// Process-unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Conversation identifier, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(Uuid);

impl ConversationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Validated tool (and prompt) name.
///
/// Pattern: `^[A-Za-z_][A-Za-z0-9_\-]{0,63}$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ToolName(String);

impl ToolName {
    pub fn new(value: impl Into<String>) -> Result<Self, ValueError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ValueError::Empty);
        }
        if !TOOL_NAME_RE.is_match(trimmed) {
            return Err(ValueError::InvalidToolName(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validated resource URI; must carry a scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ResourceUri(String);

impl ResourceUri {
    pub fn new(value: impl Into<String>) -> Result<Self, ValueError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ValueError::Empty);
        }
        if !URI_SCHEME_RE.is_match(trimmed) {
            return Err(ValueError::MissingScheme(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The closed set of known Claude model identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Model {
    #[serde(rename = "claude-opus-4-20250514")]
    Opus4,
    #[serde(rename = "claude-sonnet-4-20250514")]
    Sonnet4,
    #[serde(rename = "claude-3-7-sonnet-20250219")]
    Sonnet37,
    #[serde(rename = "claude-3-5-sonnet-20241022")]
    Sonnet35,
    #[serde(rename = "claude-3-5-haiku-20241022")]
    Haiku35,
    #[serde(rename = "claude-3-opus-20240229")]
    Opus3,
    #[serde(rename = "claude-3-haiku-20240307")]
    Haiku3,
}

/// The model used when a conversation does not specify one.
pub const DEFAULT_MODEL: Model = Model::Sonnet4;

impl Model {
    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Opus4 => "claude-opus-4-20250514",
            Model::Sonnet4 => "claude-sonnet-4-20250514",
            Model::Sonnet37 => "claude-3-7-sonnet-20250219",
            Model::Sonnet35 => "claude-3-5-sonnet-20241022",
            Model::Haiku35 => "claude-3-5-haiku-20241022",
            Model::Opus3 => "claude-3-opus-20240229",
            Model::Haiku3 => "claude-3-haiku-20240307",
        }
    }

    /// Largest output token budget the model accepts.
    pub fn max_output_tokens(&self) -> u32 {
        match self {
            Model::Opus4 => 32_768,
            Model::Sonnet4 => 16_384,
            Model::Sonnet37 => 16_384,
            Model::Sonnet35 | Model::Haiku35 => 8_192,
            Model::Opus3 | Model::Haiku3 => 4_096,
        }
    }

    /// Context window in tokens.
    pub fn context_window(&self) -> u32 {
        200_000
    }
}

impl std::str::FromStr for Model {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude-opus-4-20250514" => Ok(Model::Opus4),
            "claude-sonnet-4-20250514" => Ok(Model::Sonnet4),
            "claude-3-7-sonnet-20250219" => Ok(Model::Sonnet37),
            "claude-3-5-sonnet-20241022" => Ok(Model::Sonnet35),
            "claude-3-5-haiku-20241022" => Ok(Model::Haiku35),
            "claude-3-opus-20240229" => Ok(Model::Opus3),
            "claude-3-haiku-20240307" => Ok(Model::Haiku3),
            other => Err(ValueError::UnknownModel(other.to_string())),
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Assistant => f.write_str("assistant"),
        }
    }
}

/// Why the assistant stopped producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
}

impl StopReason {
    /// Terminal stop reasons end the tool loop; `tool_use` continues it.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StopReason::ToolUse)
    }
}

impl std::str::FromStr for StopReason {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "end_turn" => Ok(StopReason::EndTurn),
            "max_tokens" => Ok(StopReason::MaxTokens),
            "stop_sequence" => Ok(StopReason::StopSequence),
            "tool_use" => Ok(StopReason::ToolUse),
            other => Err(ValueError::UnknownStopReason(other.to_string())),
        }
    }
}

/// MIME type with a plain-text default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MimeType(String);

impl MimeType {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            Self("text/plain".to_string())
        } else {
            Self(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_text(&self) -> bool {
        self.0.starts_with("text/") || self.0 == "application/json" || self.0 == "application/xml"
    }

    pub fn is_image(&self) -> bool {
        self.0.starts_with("image/")
    }
}

impl Default for MimeType {
    fn default() -> Self {
        Self("text/plain".to_string())
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bounded system prompt (at most [`MAX_SYSTEM_PROMPT_LEN`] characters).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SystemPrompt(String);

impl SystemPrompt {
    pub fn new(value: impl Into<String>) -> Result<Self, ValueError> {
        let value = value.into();
        if value.chars().count() > MAX_SYSTEM_PROMPT_LEN {
            return Err(ValueError::TooLong {
                max: MAX_SYSTEM_PROMPT_LEN,
            });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Bounded tool description (at most [`MAX_TOOL_DESCRIPTION_LEN`] characters).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ToolDescription(String);

impl ToolDescription {
    pub fn new(value: impl Into<String>) -> Result<Self, ValueError> {
        let value = value.into();
        if value.chars().count() > MAX_TOOL_DESCRIPTION_LEN {
            return Err(ValueError::TooLong {
                max: MAX_TOOL_DESCRIPTION_LEN,
            });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
