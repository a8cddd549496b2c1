//! Common validation utilities.

use validator::ValidationError;

/// Maximum length of a user-supplied device name.
pub const MAX_DEVICE_NAME_CHARS: usize = 50;

/// Maximum length accepted for a delivery token.
pub const MAX_DELIVERY_TOKEN_LEN: usize = 4096;

/// Validates a user-supplied device name.
///
/// The name must contain at least one non-whitespace character and be at most
/// 50 characters long once trimmed.
pub fn validate_device_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("device_name_empty");
        err.message = Some("Device name cannot be empty".into());
        return Err(err);
    }
    if trimmed.chars().count() > MAX_DEVICE_NAME_CHARS {
        let mut err = ValidationError::new("device_name_length");
        err.message = Some("Device name must be at most 50 characters".into());
        return Err(err);
    }
    Ok(())
}

/// Validates that a delivery token is a plausible opaque identifier.
pub fn validate_delivery_token(token: &str) -> Result<(), ValidationError> {
    if token.is_empty() {
        let mut err = ValidationError::new("token_empty");
        err.message = Some("Delivery token cannot be empty".into());
        return Err(err);
    }
    if token.len() > MAX_DELIVERY_TOKEN_LEN {
        let mut err = ValidationError::new("token_length");
        err.message = Some("Delivery token is too long".into());
        return Err(err);
    }
    if token.chars().any(char::is_whitespace) {
        let mut err = ValidationError::new("token_format");
        err.message = Some("Delivery token cannot contain whitespace".into());
        return Err(err);
    }
    Ok(())
}

/// Shortens a delivery token for logging.
pub fn token_prefix(token: &str) -> &str {
    match token.char_indices().nth(8) {
        Some((idx, _)) => &token[..idx],
        None => token,
    }
}
