pub mod error;
pub mod protocol;
pub mod received_tcp_command;
pub mod tcp_command;
pub mod tcp_command_id;
pub mod tcp_command_payload_type;

pub const DEFAULT_PORT: u16 = 3001;

pub const PROTOCOL_VERSION: u32 = 1;

pub const MAX_NAME_LENGTH: usize = 32;

pub const ROOM_CODE_LEN: usize = 6;

/// Upper bound for a single frame payload, chunk uploads included.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

pub fn is_valid_name(name: &str) -> bool {
    let trimmed = name.trim();

    !trimmed.is_empty()
        && trimmed.chars().count() <= MAX_NAME_LENGTH
        && !trimmed.chars().any(|c| c.is_control())
}

/// Room codes are case-insensitive; every lookup goes through this.
pub fn normalize_room_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Wall-clock milliseconds since the unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_codes_are_normalized_to_uppercase() {
        assert_eq!(normalize_room_code(" ab12cd "), "AB12CD");
        assert_eq!(normalize_room_code("XYZ"), "XYZ");
    }

    #[test]
    fn names_are_validated() {
        assert!(is_valid_name("Alice"));
        assert!(is_valid_name("Movie Night"));
        assert!(!is_valid_name("   "));
        assert!(!is_valid_name("bad\nname"));
        assert!(!is_valid_name(&"x".repeat(MAX_NAME_LENGTH + 1)));
    }
}
