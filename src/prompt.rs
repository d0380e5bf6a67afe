//! Prompt templates
//!
//! A prompt is a named message template with declared arguments.
//! Rendering substitutes `{argument}` placeholders and fails if a
//! required argument is missing.

use std::collections::HashMap;

use crate::content::ContentBlock;
use crate::protocol::{
    GetPromptResult, PromptArgumentDescriptor, PromptDescriptor, PromptMessage,
};
use crate::values::{Role, ToolName};

/// A declared prompt argument.
#[derive(Debug, Clone)]
pub struct PromptArgument {
    pub name: String,
    pub description: Option<String>,
    pub required: bool,
}

impl PromptArgument {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            required: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Rendering failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PromptError {
    #[error("missing required argument: {0}")]
    MissingArgument(String),
}

/// A prompt template registered on a session.
#[derive(Debug, Clone)]
pub struct Prompt {
    name: ToolName,
    description: Option<String>,
    arguments: Vec<PromptArgument>,
    /// Ordered (role, template) pairs; templates use `{name}` placeholders.
    messages: Vec<(Role, String)>,
}

impl Prompt {
    pub fn new(name: ToolName) -> Self {
        Self {
            name,
            description: None,
            arguments: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_argument(mut self, argument: PromptArgument) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn with_message(mut self, role: Role, template: impl Into<String>) -> Self {
        self.messages.push((role, template.into()));
        self
    }

    pub fn name(&self) -> &ToolName {
        &self.name
    }

    pub fn descriptor(&self) -> PromptDescriptor {
        PromptDescriptor {
            name: self.name.as_str().to_string(),
            description: self.description.clone(),
            arguments: self
                .arguments
                .iter()
                .map(|a| PromptArgumentDescriptor {
                    name: a.name.clone(),
                    description: a.description.clone(),
                    required: a.required,
                })
                .collect(),
        }
    }

    /// Render the template with the given arguments.
    pub fn render(&self, args: &HashMap<String, String>) -> Result<GetPromptResult, PromptError> {
        for argument in &self.arguments {
            if argument.required && !args.contains_key(&argument.name) {
                return Err(PromptError::MissingArgument(argument.name.clone()));
            }
        }

        let messages = self
            .messages
            .iter()
            .map(|(role, template)| {
                let mut text = template.clone();
                for (key, value) in args {
                    text = text.replace(&format!("{{{}}}", key), value);
                }
                PromptMessage {
                    role: *role,
                    content: ContentBlock::text(text),
                }
            })
            .collect();

        Ok(GetPromptResult {
            description: self.description.clone(),
            messages,
        })
    }
}
