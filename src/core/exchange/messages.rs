//! Wire messages for the market and user streams.

use serde::Serialize;
use serde_json::Value;

/// Keys whose values must never reach the logs.
const REDACT_KEYS: &[&str] = &[
    "apikey",
    "apiKey",
    "secret",
    "passphrase",
    "private_key",
    "authorization",
];

/// Subscribe frame for the public market channel.
#[derive(Debug, Clone, Serialize)]
pub struct MarketSubscribe {
    #[serde(rename = "type")]
    kind: &'static str,
    channel: &'static str,
    markets: Vec<String>,
}

impl MarketSubscribe {
    #[must_use]
    pub fn new(markets: Vec<String>) -> Self {
        Self {
            kind: "subscribe",
            channel: "market",
            markets,
        }
    }
}

/// API credentials for the private user channel.
#[derive(Debug, Clone, Serialize)]
pub struct UserAuth {
    pub apikey: String,
    pub secret: String,
    pub passphrase: String,
}

/// Authenticated subscribe frame for the private user channel.
#[derive(Debug, Clone, Serialize)]
pub struct UserSubscribe {
    #[serde(rename = "type")]
    kind: &'static str,
    channel: &'static str,
    auth: UserAuth,
}

impl UserSubscribe {
    #[must_use]
    pub fn new(auth: UserAuth) -> Self {
        Self {
            kind: "subscribe",
            channel: "user",
            auth,
        }
    }

    /// The payload with credentials masked, safe to log.
    #[must_use]
    pub fn redacted(&self) -> Value {
        redact_payload(serde_json::to_value(self).unwrap_or_default())
    }
}

/// Recursively mask credential fields in a JSON value.
#[must_use]
pub fn redact_payload(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    if REDACT_KEYS.contains(&k.as_str()) {
                        (k, Value::String("***REDACTED***".into()))
                    } else {
                        (k, redact_payload(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact_payload).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn market_subscribe_serializes_expected_shape() {
        let frame = MarketSubscribe::new(vec!["m1".into(), "m2".into()]);
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "subscribe");
        assert_eq!(value["channel"], "market");
        assert_eq!(value["markets"], json!(["m1", "m2"]));
    }

    #[test]
    fn user_subscribe_carries_auth() {
        let frame = UserSubscribe::new(UserAuth {
            apikey: "k".into(),
            secret: "s".into(),
            passphrase: "p".into(),
        });
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["channel"], "user");
        assert_eq!(value["auth"]["apikey"], "k");
    }

    #[test]
    fn redaction_masks_secrets_recursively() {
        let value = json!({
            "type": "subscribe",
            "auth": {"apikey": "key", "secret": "sec", "passphrase": "pass"},
            "nested": [{"private_key": "pk", "other": "visible"}],
        });
        let redacted = redact_payload(value);
        assert_eq!(redacted["auth"]["apikey"], "***REDACTED***");
        assert_eq!(redacted["auth"]["secret"], "***REDACTED***");
        assert_eq!(redacted["auth"]["passphrase"], "***REDACTED***");
        assert_eq!(redacted["nested"][0]["private_key"], "***REDACTED***");
        assert_eq!(redacted["nested"][0]["other"], "visible");
        assert_eq!(redacted["type"], "subscribe");
    }

    #[test]
    fn redacted_subscribe_is_log_safe() {
        let frame = UserSubscribe::new(UserAuth {
            apikey: "key".into(),
            secret: "sec".into(),
            passphrase: "pass".into(),
        });
        let text = frame.redacted().to_string();
        assert!(!text.contains("sec\""));
        assert!(text.contains("***REDACTED***"));
    }
}
