use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;

use crate::Codec;

/// Opaque key/value pairs attached to a call and handed to the handler
/// unchanged.
#[derive(Deserialize, Serialize, Debug, Default, PartialEq, Eq, Clone)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Per-call options carried by a stub.
///
/// ```rust
/// # use shoprpc::{CallOptions, Codec};
/// let options: CallOptions =
///     serde_json::from_str(r#"{"timeout": "250ms", "codec": "MessagePack"}"#).unwrap();
/// assert_eq!(options.timeout, Some(std::time::Duration::from_millis(250)));
/// assert_eq!(options.codec, Codec::MessagePack);
/// assert_eq!(options.buffer_size, 16);
/// ```
#[serde_inline_default]
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct CallOptions {
    /// Deadline relative to the start of the call. `None` waits forever.
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde_inline_default(Codec::Json)]
    pub codec: Codec,
    /// Capacity of each message queue of a call, in messages.
    #[serde_inline_default(16)]
    pub buffer_size: usize,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Default for CallOptions {
    fn default() -> Self {
        serde_json::from_value(serde_json::Value::Object(serde_json::Map::default())).unwrap()
    }
}

#[serde_inline_default]
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct ServerConfig {
    /// Calls beyond this limit are rejected with `ResourceExhausted`.
    #[serde_inline_default(None)]
    pub max_concurrent_calls: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        serde_json::from_value(serde_json::Value::Object(serde_json::Map::default())).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_options_default() {
        let options = CallOptions::default();
        assert_eq!(options.timeout, None);
        assert_eq!(options.codec, Codec::Json);
        assert_eq!(options.buffer_size, 16);
        assert!(options.metadata.is_empty());

        assert_eq!(ServerConfig::default().max_concurrent_calls, None);
    }

    #[test]
    fn test_call_options_serde() {
        let mut options = CallOptions {
            timeout: Some(Duration::from_secs(3)),
            ..Default::default()
        };
        options.metadata.insert("x-user", "u1");

        let value = serde_json::to_value(&options).unwrap();
        assert_eq!(value["timeout"], "3s");
        assert_eq!(value["metadata"]["x-user"], "u1");
        assert_eq!(serde_json::from_value::<CallOptions>(value).unwrap(), options);
    }

    #[test]
    fn test_metadata() {
        let mut metadata: Metadata = [("b", "2"), ("a", "1")].into_iter().collect();
        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata.get("a"), Some("1"));
        assert_eq!(
            metadata.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(metadata.remove("a"), Some("1".into()));
        assert_eq!(metadata.get("a"), None);
    }
}
