//! Serde helpers for possibly-undefined values.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Deserializes a present field as `Some`, including an explicit `null`.
///
/// Paired with `#[serde(default)]` this keeps "absent" (`None`) apart from
/// `null` (`Some(Value::Null)`).
pub(crate) fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}
