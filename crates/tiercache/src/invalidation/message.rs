//! Wire format of invalidation messages.
//!
//! | channel                    | payload                     |
//! |----------------------------|-----------------------------|
//! | `<prefix>Redis.Clear`      | `<instance>:<type>:<data>`  |
//! | `<prefix>Redis.Remove`     | `<instance>:<key>`          |
//!
//! A Remove key may itself contain colons; only the first colon separates
//! the origin. A Clear payload must have exactly three fields.

use std::fmt;

use crate::error::{CacheError, Result};

const CLEAR_COMMAND: &str = "Redis.Clear";
const REMOVE_COMMAND: &str = "Redis.Remove";

/// Identity of one running node: `<hostname>_Process_000000`.
///
/// The process id is not part of it, so a restarted process keeps its
/// identity and only a host change produces a new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceIdentity(String);

impl InstanceIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity derived from the machine hostname.
    pub fn from_host() -> Self {
        Self::for_host(&local_hostname())
    }

    /// Tool identity for this process on this host.
    pub fn tool_on_host(tool: &str) -> Self {
        Self::for_tool(&local_hostname(), tool, std::process::id())
    }

    pub fn for_host(host: &str) -> Self {
        Self(format!("{host}_Process_{:06}", 0))
    }

    /// Identity for an operator tool running next to nodes on the same host.
    ///
    /// It never equals a node identity, so nodes apply what the tool publishes.
    pub fn for_tool(host: &str, tool: &str, pid: u32) -> Self {
        Self(format!("{host}_{tool}_{pid}"))
    }

    /// Use the configured override if any, else derive from the host.
    pub fn resolve(configured: Option<&str>) -> Self {
        match configured {
            Some(id) => Self::new(id),
            None => Self::from_host(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

impl fmt::Display for InstanceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Channel names under one key prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channels {
    prefix: String,
    clear: String,
    remove: String,
    pattern: String,
}

impl Channels {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            clear: format!("{prefix}{CLEAR_COMMAND}"),
            remove: format!("{prefix}{REMOVE_COMMAND}"),
            pattern: format!("{prefix}Redis.*"),
            prefix,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn clear(&self) -> &str {
        &self.clear
    }

    pub fn remove(&self) -> &str {
        &self.remove
    }

    /// Glob pattern covering both channels.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Command part of a channel name, `None` if the channel belongs to
    /// another prefix.
    pub fn command<'a>(&self, channel: &'a str) -> Option<&'a str> {
        channel.strip_prefix(self.prefix.as_str())
    }
}

/// What an invalidation message asks receivers to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationCommand {
    /// Flush every local entry matching the type/data discriminator.
    Clear { kind: String, data: String },
    /// Evict one local key.
    Remove { key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationMessage {
    origin: String,
    command: InvalidationCommand,
}

impl InvalidationMessage {
    pub fn clear(
        origin: &InstanceIdentity,
        kind: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            origin: origin.as_str().to_string(),
            command: InvalidationCommand::Clear {
                kind: kind.into(),
                data: data.into(),
            },
        }
    }

    pub fn remove(origin: &InstanceIdentity, key: impl Into<String>) -> Self {
        Self {
            origin: origin.as_str().to_string(),
            command: InvalidationCommand::Remove { key: key.into() },
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn command(&self) -> &InvalidationCommand {
        &self.command
    }

    pub fn is_from(&self, identity: &InstanceIdentity) -> bool {
        self.origin == identity.as_str()
    }

    /// Channel this message is published on.
    pub fn channel<'a>(&self, channels: &'a Channels) -> &'a str {
        match self.command {
            InvalidationCommand::Clear { .. } => channels.clear(),
            InvalidationCommand::Remove { .. } => channels.remove(),
        }
    }

    /// Encode the payload. Fails if a field would break the colon framing.
    pub fn encode(&self, channels: &Channels) -> Result<String> {
        let channel = self.channel(channels);
        if self.origin.contains(':') {
            return Err(CacheError::encode_failure(channel, "instance id contains ':'"));
        }
        match &self.command {
            InvalidationCommand::Clear { kind, data } => {
                if kind.contains(':') || data.contains(':') {
                    return Err(CacheError::encode_failure(
                        channel,
                        "clear type and data must not contain ':'",
                    ));
                }
                Ok(format!("{}:{kind}:{data}", self.origin))
            }
            InvalidationCommand::Remove { key } => Ok(format!("{}:{key}", self.origin)),
        }
    }

    /// Decode a payload received on `channel`, whose command part (channel
    /// name without the prefix) is `command`.
    pub fn decode(channel: &str, command: &str, payload: &str) -> Result<Self> {
        match command {
            CLEAR_COMMAND => {
                let fields: Vec<&str> = payload.split(':').collect();
                let [origin, kind, data] = fields.as_slice() else {
                    return Err(CacheError::malformed(
                        channel,
                        format!("expected 3 fields, got {}", fields.len()),
                    ));
                };
                Ok(Self {
                    origin: origin.to_string(),
                    command: InvalidationCommand::Clear {
                        kind: kind.to_string(),
                        data: data.to_string(),
                    },
                })
            }
            REMOVE_COMMAND => {
                let Some((origin, key)) = payload.split_once(':') else {
                    return Err(CacheError::malformed(channel, "missing instance separator"));
                };
                if key.is_empty() {
                    return Err(CacheError::malformed(channel, "empty key"));
                }
                Ok(Self {
                    origin: origin.to_string(),
                    command: InvalidationCommand::Remove {
                        key: key.to_string(),
                    },
                })
            }
            other => Err(CacheError::malformed(
                channel,
                format!("unknown command {other}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(host: &str) -> InstanceIdentity {
        InstanceIdentity::for_host(host)
    }

    #[test]
    fn test_identity_format() {
        assert_eq!(node("host1").as_str(), "host1_Process_000000");
        assert_eq!(
            InstanceIdentity::resolve(Some("custom")).to_string(),
            "custom"
        );
        assert!(
            InstanceIdentity::from_host()
                .as_str()
                .ends_with("_Process_000000")
        );
    }

    #[test]
    fn test_tool_identity_differs_from_node_on_same_host() {
        let tool = InstanceIdentity::for_tool("host1", "Cli", 4242);
        assert_eq!(tool.as_str(), "host1_Cli_4242");
        assert_ne!(tool, node("host1"));

        let own = InstanceIdentity::tool_on_host("Cli");
        assert!(own.as_str().ends_with(&format!("_Cli_{}", std::process::id())));
        assert_ne!(own, InstanceIdentity::from_host());
    }

    #[test]
    fn test_channels() {
        let channels = Channels::new("1.0");
        assert_eq!(channels.clear(), "1.0Redis.Clear");
        assert_eq!(channels.remove(), "1.0Redis.Remove");
        assert_eq!(channels.pattern(), "1.0Redis.*");
        assert_eq!(channels.command("1.0Redis.Clear"), Some("Redis.Clear"));
        assert_eq!(channels.command("2.0Redis.Clear"), None);
    }

    #[test]
    fn test_encode() {
        let channels = Channels::new("1.0");
        let clear = InvalidationMessage::clear(&node("host1"), "portal", "7");
        assert_eq!(clear.encode(&channels).unwrap(), "host1_Process_000000:portal:7");
        assert_eq!(clear.channel(&channels), "1.0Redis.Clear");

        let remove = InvalidationMessage::remove(&node("h"), "ECM_1.a:b");
        assert_eq!(remove.encode(&channels).unwrap(), "h_Process_000000:ECM_1.a:b");
        assert_eq!(remove.channel(&channels), "1.0Redis.Remove");
    }

    #[test]
    fn test_encode_rejects_colon_in_clear_fields() {
        let channels = Channels::new("1.0");
        let clear = InvalidationMessage::clear(&node("h"), "portal", "7:8");
        assert!(matches!(
            clear.encode(&channels),
            Err(CacheError::EncodeFailure { .. })
        ));
    }

    #[test]
    fn test_decode_clear() {
        let message =
            InvalidationMessage::decode("1.0Redis.Clear", "Redis.Clear", "host1_Process_000000:portal:7")
                .unwrap();
        assert_eq!(message.origin(), "host1_Process_000000");
        assert_eq!(
            message.command(),
            &InvalidationCommand::Clear {
                kind: "portal".into(),
                data: "7".into()
            }
        );
        assert!(message.is_from(&node("host1")));
        assert!(!message.is_from(&node("host2")));
    }

    #[test]
    fn test_decode_clear_requires_three_fields() {
        for payload in ["a:b", "a:b:c:d", "", "solo"] {
            assert!(
                InvalidationMessage::decode("c", "Redis.Clear", payload).is_err(),
                "{payload} should be rejected"
            );
        }
        // Empty fields are still three fields
        assert!(InvalidationMessage::decode("c", "Redis.Clear", "h::").is_ok());
    }

    #[test]
    fn test_decode_remove_splits_on_first_colon() {
        let message =
            InvalidationMessage::decode("r", "Redis.Remove", "h_Process_000000:ECM_1.a:b:c").unwrap();
        assert_eq!(message.origin(), "h_Process_000000");
        assert_eq!(
            message.command(),
            &InvalidationCommand::Remove {
                key: "ECM_1.a:b:c".into()
            }
        );
    }

    #[test]
    fn test_decode_remove_malformed() {
        assert!(InvalidationMessage::decode("r", "Redis.Remove", "no-separator").is_err());
        assert!(InvalidationMessage::decode("r", "Redis.Remove", "origin:").is_err());
        assert!(InvalidationMessage::decode("r", "Redis.Remove", "").is_err());
    }

    #[test]
    fn test_decode_unknown_command() {
        let err = InvalidationMessage::decode("1.0Redis.Flush", "Redis.Flush", "a:b").unwrap_err();
        assert!(err.to_string().contains("unknown command"));
    }
}
