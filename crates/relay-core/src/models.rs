//! Capability model and backend session states

use serde::{Deserialize, Serialize};

/// Kind of capability a backend can advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Tool,
    Resource,
    Prompt,
}

impl CapabilityKind {
    /// All kinds, in the order they are queried from a backend
    pub const ALL: [CapabilityKind; 3] = [
        CapabilityKind::Tool,
        CapabilityKind::Resource,
        CapabilityKind::Prompt,
    ];

    /// Method used to list capabilities of this kind
    pub fn list_method(self) -> &'static str {
        match self {
            CapabilityKind::Tool => "tools/list",
            CapabilityKind::Resource => "resources/list",
            CapabilityKind::Prompt => "prompts/list",
        }
    }

    /// Method used to invoke (call, read, get) a capability of this kind
    pub fn invoke_method(self) -> &'static str {
        match self {
            CapabilityKind::Tool => "tools/call",
            CapabilityKind::Resource => "resources/read",
            CapabilityKind::Prompt => "prompts/get",
        }
    }

    /// Key holding the item array in a list result, and the key under
    /// which a server advertises support in its capabilities object
    pub fn collection_key(self) -> &'static str {
        match self {
            CapabilityKind::Tool => "tools",
            CapabilityKind::Resource => "resources",
            CapabilityKind::Prompt => "prompts",
        }
    }

    /// Field of a listed item that carries its name
    pub fn name_field(self) -> &'static str {
        match self {
            CapabilityKind::Resource => "uri",
            CapabilityKind::Tool | CapabilityKind::Prompt => "name",
        }
    }

    /// Whether names of this kind may be rewritten into a backend namespace.
    /// Resource URIs are globally meaningful and never rewritten.
    pub fn namespaceable(self) -> bool {
        !matches!(self, CapabilityKind::Resource)
    }
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CapabilityKind::Tool => "tool",
            CapabilityKind::Resource => "resource",
            CapabilityKind::Prompt => "prompt",
        };
        f.write_str(s)
    }
}

/// One capability in the aggregated catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityEntry {
    /// Name exposed to front sessions
    pub qualified_name: String,
    /// Name as advertised by the owning backend
    pub local_name: String,
    /// Capability kind
    pub kind: CapabilityKind,
    /// Name of the backend that owns this entry
    pub owner: String,
    /// Descriptor payload as listed by the backend (schema, description, ...)
    pub descriptor: serde_json::Value,
}

impl CapabilityEntry {
    /// Descriptor as served to a front session: the backend's payload with
    /// its name field replaced by the qualified name.
    pub fn exposed_descriptor(&self) -> serde_json::Value {
        let mut descriptor = self.descriptor.clone();
        if let Some(obj) = descriptor.as_object_mut() {
            obj.insert(
                self.kind.name_field().to_string(),
                serde_json::Value::String(self.qualified_name.clone()),
            );
        }
        descriptor
    }
}

/// Connection state of a backend session.
///
/// ```text
/// Connecting ──ok──▶ Connected ──transport closed──▶ Disconnected
///     │  ▲
///  err│  │backoff elapsed
///     ▼  │
/// Retrying(n) ──n == max──▶ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// A connect attempt is in progress
    Connecting,
    /// Handshake completed; the session serves capabilities
    Connected,
    /// The given number of attempts failed; waiting out the backoff
    Retrying(u32),
    /// Retry budget exhausted or transport could not be built. Terminal.
    Failed,
    /// A previously connected session closed. Terminal.
    Disconnected,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Connecting => f.write_str("connecting"),
            SessionState::Connected => f.write_str("connected"),
            SessionState::Retrying(n) => write!(f, "retrying({})", n),
            SessionState::Failed => f.write_str("failed"),
            SessionState::Disconnected => f.write_str("disconnected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_methods() {
        assert_eq!(CapabilityKind::Tool.invoke_method(), "tools/call");
        assert_eq!(CapabilityKind::Resource.invoke_method(), "resources/read");
        assert_eq!(CapabilityKind::Prompt.list_method(), "prompts/list");
        assert_eq!(CapabilityKind::Resource.name_field(), "uri");
    }

    #[test]
    fn exposed_descriptor_uses_qualified_name() {
        let entry = CapabilityEntry {
            qualified_name: "git/status".to_string(),
            local_name: "status".to_string(),
            kind: CapabilityKind::Tool,
            owner: "git".to_string(),
            descriptor: json!({"name": "status", "inputSchema": {"type": "object"}}),
        };

        let exposed = entry.exposed_descriptor();
        assert_eq!(exposed["name"], "git/status");
        assert_eq!(exposed["inputSchema"]["type"], "object");
        // the stored payload stays untouched
        assert_eq!(entry.descriptor["name"], "status");
    }

    #[test]
    fn session_state_display() {
        assert_eq!(SessionState::Retrying(2).to_string(), "retrying(2)");
        assert_eq!(SessionState::Failed.to_string(), "failed");
        assert!(!SessionState::Retrying(1).is_connected());
        assert!(SessionState::Connected.is_connected());
    }
}
