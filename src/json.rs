//! JSON rendering of decoded values for durable failure records.
//!
//! Big integers are rendered as decimal strings and byte-like values as 0x-prefixed hex, so
//! the payload survives storage backends without 256-bit integer support.

use alloy::{dyn_abi::DynSolValue, hex};
use serde_json::Value;

use crate::decoder::DecodedEvent;

/// Renders a single decoded value.
#[must_use]
pub fn sol_value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Bool(value) => Value::Bool(*value),
        DynSolValue::Int(value, _) => Value::String(value.to_string()),
        DynSolValue::Uint(value, _) => Value::String(value.to_string()),
        DynSolValue::FixedBytes(word, size) => Value::String(hex::encode_prefixed(&word[..*size])),
        DynSolValue::Address(address) => Value::String(address.to_checksum(None)),
        DynSolValue::Bytes(bytes) => Value::String(hex::encode_prefixed(bytes)),
        DynSolValue::String(value) => Value::String(value.clone()),
        DynSolValue::Array(values)
        | DynSolValue::FixedArray(values)
        | DynSolValue::Tuple(values) => {
            Value::Array(values.iter().map(sol_value_to_json).collect())
        }
        other => Value::String(format!("{other:?}")),
    }
}

/// Renders the full event payload: metadata plus decoded arguments by parameter name.
#[must_use]
pub fn event_payload(event: &DecodedEvent) -> Value {
    serde_json::json!({
        "event": event.name,
        "address": event.address.to_checksum(None),
        "block_number": event.block_number,
        "block_hash": format!("{}", event.block_hash),
        "transaction_hash": format!("{}", event.transaction_hash),
        "transaction_index": event.transaction_index,
        "log_index": event.log_index,
        "args": event
            .args
            .iter()
            .map(|(name, value)| (name.clone(), sol_value_to_json(value)))
            .collect::<serde_json::Map<_, _>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, U256};

    #[test]
    fn uints_render_as_decimal_strings() {
        let value = DynSolValue::Uint(U256::from(10).pow(U256::from(30)), 256);
        assert_eq!(sol_value_to_json(&value), Value::String("1".to_owned() + &"0".repeat(30)));
    }

    #[test]
    fn addresses_render_checksummed() {
        let value = DynSolValue::Address(address!("d8dA6BF26964aF9D7eEd9e03E53415D37aA96045"));
        assert_eq!(
            sol_value_to_json(&value),
            Value::String("0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045".to_owned())
        );
    }

    #[test]
    fn bytes_render_hex_prefixed() {
        let value = DynSolValue::Bytes(vec![0xca, 0xfe]);
        assert_eq!(sol_value_to_json(&value), Value::String("0xcafe".to_owned()));
    }

    #[test]
    fn nested_values_render_recursively() {
        let value = DynSolValue::Tuple(vec![
            DynSolValue::Bool(true),
            DynSolValue::Array(vec![DynSolValue::Uint(U256::from(7u64), 256)]),
        ]);
        assert_eq!(
            sol_value_to_json(&value),
            serde_json::json!([true, ["7"]])
        );
    }
}
