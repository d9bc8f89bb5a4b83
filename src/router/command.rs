use crate::device::Device;

pub const ATTACH: &str = "attach";
pub const EVENT: &str = "event";

/// An operation as pulled from the command queue
///
/// Either a bare tag or a richer request carrying an operation id. The
/// router classifies by tag with a pattern match, never by probing for
/// attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Plain(String),
    Request { operation_tag: String, id: String },
}

impl Operation {
    pub fn plain(tag: impl Into<String>) -> Self {
        Self::Plain(tag.into())
    }

    pub fn request(tag: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Request {
            operation_tag: tag.into(),
            id: id.into(),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::Plain(tag) => tag,
            Self::Request { operation_tag, .. } => operation_tag,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Plain(_) => None,
            Self::Request { id, .. } => Some(id),
        }
    }
}

/// Classifier determining the dispatch branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationTag {
    Attach,
    Event,
    Unrecognized(String),
}

impl OperationTag {
    pub fn classify(tag: &str) -> Self {
        match tag {
            ATTACH => Self::Attach,
            EVENT => Self::Event,
            other => Self::Unrecognized(other.to_string()),
        }
    }
}

/// A `(device, operation)` instruction from the command queue
///
/// `payload` is an opaque pass-through value; when absent, the router
/// substitutes a fixed placeholder at dispatch time.
#[derive(Debug, Clone)]
pub struct Command {
    pub device: Device,
    pub operation: Operation,
    pub payload: Option<serde_json::Value>,
}

impl Command {
    pub fn new(device: Device, operation: Operation) -> Self {
        Self {
            device,
            operation,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}
