//! Structural validation of audit events.
//!
//! Checks that required fields are present, identifiers are bounded and
//! free of control characters, and the unhashed extras (tags, metadata) stay
//! within limits. Validation never looks at chain state.

use serde_json::Value;

use crate::error::ValidationError;
use crate::event::AuditEvent;

/// Maximum length of identifier fields (ids, organization, request).
pub const MAX_ID_LEN: usize = 256;

/// Maximum length of descriptive fields (action, resource, user agent).
pub const MAX_TEXT_LEN: usize = 1024;

/// Maximum number of tags per event.
pub const MAX_TAGS: usize = 32;

/// Maximum length of a single tag.
pub const MAX_TAG_LEN: usize = 64;

/// Validate an event's fields.
pub fn validate_event(event: &AuditEvent) -> Result<(), ValidationError> {
    required("organization_id", &event.organization_id, MAX_ID_LEN)?;
    required("request_id", &event.request_id, MAX_ID_LEN)?;
    required("correlation_id", &event.correlation_id, MAX_ID_LEN)?;
    required("action", &event.action, MAX_TEXT_LEN)?;
    required("resource", &event.resource, MAX_TEXT_LEN)?;

    optional("user_id", event.user_id.as_deref(), MAX_ID_LEN)?;
    optional("session_id", event.session_id.as_deref(), MAX_ID_LEN)?;
    optional("ip_address", event.ip_address.as_deref(), MAX_ID_LEN)?;
    optional("user_agent", event.user_agent.as_deref(), MAX_TEXT_LEN)?;
    optional("resource_id", event.resource_id.as_deref(), MAX_ID_LEN)?;
    optional("resource_type", event.resource_type.as_deref(), MAX_ID_LEN)?;

    validate_tags(&event.tags)?;

    if !matches!(event.metadata, Value::Object(_)) {
        return Err(ValidationError::MetadataNotObject);
    }

    Ok(())
}

/// Validate a tag list.
pub fn validate_tags(tags: &[String]) -> Result<(), ValidationError> {
    if tags.len() > MAX_TAGS {
        return Err(ValidationError::TooManyTags {
            count: tags.len(),
            max: MAX_TAGS,
        });
    }
    for tag in tags {
        required("tag", tag, MAX_TAG_LEN)?;
    }
    Ok(())
}

fn required(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    bounded(field, value, max)
}

fn optional(field: &'static str, value: Option<&str>, max: usize) -> Result<(), ValidationError> {
    match value {
        Some(v) => bounded(field, v, max),
        None => Ok(()),
    }
}

fn bounded(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.len() > max {
        return Err(ValidationError::FieldTooLong { field, max });
    }
    if value.chars().any(char::is_control) {
        return Err(ValidationError::ControlCharacters(field));
    }
    Ok(())
}
