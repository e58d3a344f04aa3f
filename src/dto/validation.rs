//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest room key accepted on the relay endpoint.
pub const MAX_ROOM_KEY_LENGTH: usize = 128;

/// Validates a raw room key as received in the `room` query parameter.
///
/// Room keys are free-form and case-sensitive; only their length and the absence of control
/// characters are enforced.
///
/// # Examples
///
/// ```ignore
/// validate_room_key("@some.streamer") // Ok
/// validate_room_key("tab\there")      // Err - control character
/// ```
pub fn validate_room_key(key: &str) -> Result<(), ValidationError> {
    if key.chars().count() > MAX_ROOM_KEY_LENGTH {
        let mut err = ValidationError::new("room_key_length");
        err.message = Some(
            format!(
                "Room key must be at most {MAX_ROOM_KEY_LENGTH} characters (got {})",
                key.chars().count()
            )
            .into(),
        );
        return Err(err);
    }

    if key.chars().any(char::is_control) {
        let mut err = ValidationError::new("room_key_format");
        err.message = Some("Room key must not contain control characters".into());
        return Err(err);
    }

    Ok(())
}

/// Strip the leading `@` from a room key and fall back to `default_room` when nothing is left.
pub fn normalize_room_key(raw: Option<&str>, default_room: &str) -> String {
    let trimmed = raw.map(str::trim).unwrap_or_default();
    let key = trimmed.strip_prefix('@').unwrap_or(trimmed);
    if key.is_empty() {
        default_room.trim_start_matches('@').to_string()
    } else {
        key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_room_key_valid() {
        assert!(validate_room_key("lobby").is_ok());
        assert!(validate_room_key("@Some.Streamer_01").is_ok());
        assert!(validate_room_key("").is_ok());
    }

    #[test]
    fn test_validate_room_key_invalid() {
        assert!(validate_room_key(&"x".repeat(MAX_ROOM_KEY_LENGTH + 1)).is_err()); // too long
        assert!(validate_room_key("tab\there").is_err()); // control char
        assert!(validate_room_key("line\nbreak").is_err());
    }

    #[test]
    fn test_normalize_room_key() {
        assert_eq!(normalize_room_key(Some("@Nova"), "lobby"), "Nova");
        assert_eq!(normalize_room_key(Some("nova"), "lobby"), "nova");
        assert_eq!(normalize_room_key(Some("@"), "lobby"), "lobby");
        assert_eq!(normalize_room_key(None, "@lobby"), "lobby");
    }
}
