//! Validation helpers for DTOs.

use validator::{ValidationError, ValidationErrors};

// Field limits, also published through the pool configuration.
pub const CLAIMANT_MAX_LENGTH: usize = 30;
pub const NAME_MAX_LENGTH: usize = 50;
pub const NOTES_MAX_LENGTH: usize = 500;
pub const TEAM_NAME_MAX_LENGTH: usize = 75;
pub const MIN_JOIN_PASSWORD_LENGTH: usize = 6;

fn error(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

/// Control, formatting and private-use code points.
fn is_unprintable(c: char) -> bool {
    c.is_control()
        || matches!(c,
            '\u{00AD}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{FEFF}'
            | '\u{E000}'..='\u{F8FF}')
}

/// Single-line text without control or formatting characters.
pub fn validate_printable(value: &str) -> Result<(), ValidationError> {
    if value.chars().any(is_unprintable) {
        return Err(error("printable", "must be a valid string"));
    }
    Ok(())
}

/// Like [`validate_printable`] but line breaks are allowed.
pub fn validate_printable_multiline(value: &str) -> Result<(), ValidationError> {
    if value
        .chars()
        .any(|c| c != '\n' && c != '\r' && is_unprintable(c))
    {
        return Err(error("printable", "must be a valid string"));
    }
    Ok(())
}

/// At least one letter, digit or underscore.
pub fn validate_contains_word_char(value: &str) -> Result<(), ValidationError> {
    if !value.chars().any(|c| c.is_alphanumeric() || c == '_') {
        return Err(error(
            "word_char",
            "must contain at least one letter or number",
        ));
    }
    Ok(())
}

/// `#rrggbb`.
pub fn validate_hex_color(value: &str) -> Result<(), ValidationError> {
    let valid = value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err(error("hex_color", "must be a valid color"));
    }
    Ok(())
}

/// Validate a square claimant, collecting failures under `claimant`.
pub fn validate_claimant(value: &str) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    if value.is_empty() {
        errors.add("claimant", error("required", "is required"));
    } else {
        if value.chars().count() > CLAIMANT_MAX_LENGTH {
            errors.add(
                "claimant",
                error("length", "must be 30 characters or fewer"),
            );
        }
        if let Err(err) = validate_printable(value) {
            errors.add("claimant", err);
        }
        if let Err(err) = validate_contains_word_char(value) {
            errors.add("claimant", err);
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printable_rejects_control_and_format_characters() {
        assert!(validate_printable("Alice & Bob").is_ok());
        assert!(validate_printable("Zoë 🏈").is_ok());
        assert!(validate_printable("tab\there").is_err());
        assert!(validate_printable("zero\u{200B}width").is_err());
        assert!(validate_printable("line\nbreak").is_err());
        assert!(validate_printable_multiline("line\nbreak\r\n").is_ok());
        assert!(validate_printable_multiline("bell\u{7}").is_err());
    }

    #[test]
    fn word_char_requires_a_letter_or_digit() {
        assert!(validate_contains_word_char("a").is_ok());
        assert!(validate_contains_word_char("#1").is_ok());
        assert!(validate_contains_word_char("_").is_ok());
        assert!(validate_contains_word_char("!!!").is_err());
        assert!(validate_contains_word_char("   ").is_err());
    }

    #[test]
    fn hex_colors_need_hash_and_six_digits() {
        assert!(validate_hex_color("#e31837").is_ok());
        assert!(validate_hex_color("#FFB81C").is_ok());
        assert!(validate_hex_color("e31837").is_err());
        assert!(validate_hex_color("#e3183").is_err());
        assert!(validate_hex_color("#e3183g").is_err());
    }

    #[test]
    fn claimant_errors_are_collected_under_one_field() {
        assert!(validate_claimant("Alice").is_ok());
        let errors = validate_claimant("!!!").unwrap_err();
        assert!(errors.field_errors().contains_key("claimant"));
        assert!(validate_claimant(&"x".repeat(31)).is_err());
        assert!(validate_claimant(&"é".repeat(30)).is_ok());
        assert!(validate_claimant("").is_err());
    }
}
