//! Composite address encoding for targeted messages.
//!
//! `DataToRoom` and `DataToSocket` frames carry their routing targets inside
//! the frame's address field as a single string: `id1,id2:event`. The target
//! list and the event name are separated by the first `:`, so event names may
//! themselves contain colons; target ids are the constrained side and may
//! contain neither `:` nor `,`.

use thiserror::Error;

/// Separator between the target list and the event name.
const EVENT_SEPARATOR: char = ':';

/// Separator between individual target ids.
const LIST_SEPARATOR: char = ',';

/// Errors for malformed composite addresses.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    /// A target id contains a reserved separator character.
    #[error("target id {0:?} contains a reserved character")]
    InvalidTarget(String),

    /// The target list is empty.
    #[error("composite address has no targets")]
    EmptyTargets,

    /// A target id between separators is empty.
    #[error("composite address contains an empty target id")]
    EmptyTarget,

    /// No separator between the target list and the event name.
    #[error("composite address {0:?} is missing the ':' separator")]
    MissingSeparator(String),
}

/// A decoded composite address: target ids plus the event name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeAddress {
    /// Target socket ids or room names.
    pub targets: Vec<String>,
    /// The event name.
    pub event: String,
}

/// Encode a target list and event name into a composite address.
///
/// # Errors
///
/// Returns an error if the list is empty or any id is empty or contains a
/// separator character.
pub fn encode(targets: &[String], event: &str) -> Result<String, AddressError> {
    if targets.is_empty() {
        return Err(AddressError::EmptyTargets);
    }
    for target in targets {
        if target.is_empty() {
            return Err(AddressError::EmptyTarget);
        }
        if target.contains(EVENT_SEPARATOR) || target.contains(LIST_SEPARATOR) {
            return Err(AddressError::InvalidTarget(target.clone()));
        }
    }
    Ok(format!("{}{}{}", targets.join(","), EVENT_SEPARATOR, event))
}

/// Decode a composite address.
///
/// Splits on the first `:` only, so colons inside the event name survive a
/// round trip.
///
/// # Errors
///
/// Returns an error if the separator is missing or the target list is empty
/// or contains an empty id.
pub fn decode(address: &str) -> Result<CompositeAddress, AddressError> {
    let (list, event) = address
        .split_once(EVENT_SEPARATOR)
        .ok_or_else(|| AddressError::MissingSeparator(address.to_string()))?;

    if list.is_empty() {
        return Err(AddressError::EmptyTargets);
    }

    let mut targets = Vec::new();
    for target in list.split(LIST_SEPARATOR) {
        if target.is_empty() {
            return Err(AddressError::EmptyTarget);
        }
        targets.push(target.to_string());
    }

    Ok(CompositeAddress {
        targets,
        event: event.to_string(),
    })
}
