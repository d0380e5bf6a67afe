//! Resource entities
//!
//! A resource is addressable content keyed by URI. Text and binary
//! bodies are both supported; binary bodies are carried base64-encoded
//! on the wire.

use crate::protocol::{ReadResourceResult, ResourceContents, ResourceDescriptor};
use crate::values::{MimeType, ResourceUri};

/// Readable content attached to a resource.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceBody {
    Text(String),
    /// Base64-encoded bytes.
    Blob(String),
}

/// A resource registered on a session.
#[derive(Debug, Clone)]
pub struct Resource {
    uri: ResourceUri,
    name: String,
    mime_type: MimeType,
    body: Option<ResourceBody>,
}

impl Resource {
    pub fn new(uri: ResourceUri, name: impl Into<String>) -> Self {
        Self {
            uri,
            name: name.into(),
            mime_type: MimeType::default(),
            body: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: MimeType) -> Self {
        self.mime_type = mime_type;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.body = Some(ResourceBody::Text(text.into()));
        self
    }

    /// Attach base64-encoded binary content.
    pub fn with_blob(mut self, blob: impl Into<String>) -> Self {
        self.body = Some(ResourceBody::Blob(blob.into()));
        self
    }

    pub fn uri(&self) -> &ResourceUri {
        &self.uri
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &MimeType {
        &self.mime_type
    }

    pub fn descriptor(&self) -> ResourceDescriptor {
        ResourceDescriptor {
            uri: self.uri.as_str().to_string(),
            name: self.name.clone(),
            mime_type: Some(self.mime_type.as_str().to_string()),
        }
    }

    /// The resources/read result for this resource. A resource without a
    /// body reads as empty contents.
    pub fn read(&self) -> ReadResourceResult {
        let contents = match &self.body {
            Some(ResourceBody::Text(text)) => vec![ResourceContents {
                uri: self.uri.as_str().to_string(),
                mime_type: Some(self.mime_type.as_str().to_string()),
                text: Some(text.clone()),
                blob: None,
            }],
            Some(ResourceBody::Blob(blob)) => vec![ResourceContents {
                uri: self.uri.as_str().to_string(),
                mime_type: Some(self.mime_type.as_str().to_string()),
                text: None,
                blob: Some(blob.clone()),
            }],
            None => Vec::new(),
        };
        ReadResourceResult { contents }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> ResourceUri {
        ResourceUri::new(s).unwrap()
    }

    #[test]
    fn test_text_resource_read() {
        let resource = Resource::new(uri("file:///notes.md"), "Notes")
            .with_mime_type(MimeType::new("text/markdown"))
            .with_text("# hi");

        let result = resource.read();
        assert_eq!(result.contents.len(), 1);
        assert_eq!(result.contents[0].text.as_deref(), Some("# hi"));
        assert!(result.contents[0].blob.is_none());
        assert_eq!(
            result.contents[0].mime_type.as_deref(),
            Some("text/markdown")
        );
    }

    #[test]
    fn test_blob_resource_read() {
        let resource = Resource::new(uri("file:///logo.png"), "Logo")
            .with_mime_type(MimeType::new("image/png"))
            .with_blob("aGVsbG8=");

        let result = resource.read();
        assert_eq!(result.contents[0].blob.as_deref(), Some("aGVsbG8="));
        assert!(result.contents[0].text.is_none());
    }

    #[test]
    fn test_empty_resource_reads_empty() {
        let resource = Resource::new(uri("mem://empty"), "Empty");
        assert!(resource.read().contents.is_empty());
    }

    #[test]
    fn test_descriptor() {
        let resource = Resource::new(uri("file:///x"), "X");
        let descriptor = resource.descriptor();
        assert_eq!(descriptor.uri, "file:///x");
        assert_eq!(descriptor.name, "X");
        assert_eq!(descriptor.mime_type.as_deref(), Some("text/plain"));
    }
}
