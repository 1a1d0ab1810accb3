//! ABI helpers: event fragment lookup and log-topic derivation.

use alloy::{
    json_abi::{Event, JsonAbi},
    primitives::B256,
};

use crate::error::ValidationError;

/// Parses a serialized contract ABI.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidAbi`] if the input is not a valid JSON ABI.
pub fn parse_abi(json: &str) -> Result<JsonAbi, ValidationError> {
    Ok(serde_json::from_str(json)?)
}

/// Extracts the event fragment with the given name from a contract ABI.
///
/// # Errors
///
/// Returns [`ValidationError::EventNotFound`] if the ABI declares no such event.
pub fn find_event<'a>(abi: &'a JsonAbi, name: &str) -> Result<&'a Event, ValidationError> {
    abi.events()
        .find(|event| event.name == name)
        .ok_or_else(|| ValidationError::EventNotFound(name.to_owned()))
}

/// Derives the log topic for an event: the full 32-byte keccak-256 hash of the canonical
/// signature `name(type1,type2,...)`.
///
/// Unlike function selectors, log topics are never truncated to 4 bytes.
#[must_use]
pub fn event_topic(event: &Event) -> B256 {
    event.selector()
}
