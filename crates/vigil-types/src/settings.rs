//! Read-only settings tree and the parsed client identity.
//!
//! The agent treats its configuration as an opaque tree: the only
//! operations it needs are dotted-path lookup (for command token
//! substitution), access to local check definitions, and the raw client
//! block (for the keepalive payload). [`ClientSpec`] is the small typed
//! view the runtime actually interprets.

use serde::Deserialize;
use serde_json::Value;

use crate::error::VigilError;

/// Default bind address for the local result sockets.
pub const DEFAULT_SOCKET_BIND: &str = "127.0.0.1";

/// Default port for the local result sockets.
pub const DEFAULT_SOCKET_PORT: u16 = 3030;

/// Read-only view over the agent's settings tree.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    root: Value,
}

impl Settings {
    /// Wrap a settings tree.
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    /// The full settings tree.
    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Walk a dotted path (`"client.socket.port"`) through the tree.
    ///
    /// Returns `None` if any segment is missing or a non-object is
    /// traversed mid-path.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.root, path)
    }

    /// The local definition for a named check, if one exists.
    pub fn check_definition(&self, name: &str) -> Option<&Value> {
        self.root.get("checks").and_then(|checks| checks.get(name))
    }

    /// Iterate local check definitions as `(name, definition)` pairs.
    pub fn checks(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.root
            .get("checks")
            .and_then(Value::as_object)
            .into_iter()
            .flatten()
    }

    /// A clone of the raw `client` block, or an empty object when absent.
    ///
    /// This is the base of the keepalive payload.
    pub fn client_value(&self) -> Value {
        self.root
            .get("client")
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()))
    }
}

/// Walk `path` segments through nested objects.
fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

#[derive(Debug, Clone, Deserialize)]
struct RawSocketSpec {
    #[serde(default = "default_bind")]
    bind: String,
    #[serde(default = "default_port")]
    port: u16,
}

impl Default for RawSocketSpec {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

fn default_bind() -> String {
    DEFAULT_SOCKET_BIND.to_string()
}

fn default_port() -> u16 {
    DEFAULT_SOCKET_PORT
}

#[derive(Debug, Clone, Deserialize)]
struct RawClientSpec {
    name: String,
    subscriptions: Vec<String>,
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    safe_mode: bool,
    #[serde(default)]
    redact: Option<Vec<String>>,
    #[serde(default)]
    socket: RawSocketSpec,
}

/// The typed client identity parsed from `client.*`.
#[derive(Debug, Clone)]
pub struct ClientSpec {
    /// Host-unique client name. Required.
    pub name: String,
    /// Transport subscriptions. Required, non-empty.
    pub subscriptions: Vec<String>,
    /// Optional signature attached to every published result.
    pub signature: Option<String>,
    /// Refuse server-pushed commands without a local definition.
    pub safe_mode: bool,
    /// Sensitive key names to mask in the keepalive payload.
    /// `None` selects the built-in default list.
    pub redact: Option<Vec<String>>,
    /// Bind address for the local result sockets.
    pub socket_bind: String,
    /// Port for the local result sockets.
    pub socket_port: u16,
}

impl ClientSpec {
    /// Parse the client identity out of the settings tree.
    ///
    /// `client.name` and a non-empty `client.subscriptions` are required;
    /// everything else falls back to defaults.
    pub fn from_settings(settings: &Settings) -> Result<Self, VigilError> {
        let client = settings
            .root()
            .get("client")
            .ok_or_else(|| VigilError::Config("missing client settings block".into()))?;

        let raw: RawClientSpec = serde_json::from_value(client.clone())
            .map_err(|e| VigilError::Config(format!("invalid client settings: {e}")))?;

        if raw.name.is_empty() {
            return Err(VigilError::Config("client.name must not be empty".into()));
        }
        if raw.subscriptions.is_empty() {
            return Err(VigilError::Config(
                "client.subscriptions must list at least one subscription".into(),
            ));
        }

        Ok(Self {
            name: raw.name,
            subscriptions: raw.subscriptions,
            signature: raw.signature,
            safe_mode: raw.safe_mode,
            redact: raw.redact,
            socket_bind: raw.socket.bind,
            socket_port: raw.socket.port,
        })
    }
}
