use mrpc::Value;
use thiserror::Error;

use crate::Msg;

/// Errors from encoding/decoding push messages.
#[derive(Debug, Error)]
pub enum Error {
    /// The provided value was not a binary payload.
    #[error("expected binary message payload, got {0:?}")]
    InvalidValueType(Value),
    /// Deserialization via rmp_serde failed.
    #[error(transparent)]
    Decode(#[from] rmp_serde::decode::Error),
    /// Serialization via rmp_serde failed.
    #[error(transparent)]
    Encode(#[from] rmp_serde::encode::Error),
}

/// Encode a [`Msg`] into an `mrpc::Value` as a binary payload.
pub fn msg_to_value(msg: &Msg) -> Result<Value, Error> {
    let bytes = rmp_serde::to_vec_named(msg)?;
    Ok(Value::Binary(bytes))
}

/// Decode an `mrpc::Value` (binary) back into a [`Msg`].
///
/// # Errors
/// Returns an error if the payload is not binary or cannot be decoded.
pub fn value_to_msg(value: Value) -> Result<Msg, Error> {
    match value {
        Value::Binary(bytes) => {
            let msg: Msg = rmp_serde::from_slice(&bytes)?;
            Ok(msg)
        }
        other => Err(Error::InvalidValueType(other)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::{MonitorStatus, Rect, Status};

    #[test]
    fn snapshot_message_survives_the_wire() {
        let mut monitor_settings = BTreeMap::new();
        monitor_settings.insert(
            2,
            MonitorStatus {
                enabled: true,
                opacity: 0.42,
                bounds: Rect::new(1920, 0, 2560, 1440),
                is_focused: false,
                has_overlay: true,
            },
        );
        let msg = Msg::InitialStatus(Status {
            enabled: true,
            opacity: 0.7,
            focused_display: Some(1),
            monitor_settings,
            permission_denied: false,
        });
        let val = msg_to_value(&msg).expect("encode");
        let back = value_to_msg(val).expect("decode");
        assert_eq!(msg, back);
    }

    #[test]
    fn non_binary_value_is_rejected() {
        let err = value_to_msg(Value::String("nope".into())).unwrap_err();
        assert!(matches!(err, Error::InvalidValueType(_)));
    }
}
