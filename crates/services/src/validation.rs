//! Input checks applied before any store access.

use domains::{DomainError, MediaType, Result};
use mime::Mime;
use once_cell::sync::Lazy;
use regex::Regex;

pub const MAX_TITLE_LEN: usize = 300;
pub const MAX_POST_CONTENT_LEN: usize = 100_000;
pub const MAX_COMMENT_LEN: usize = 5_000;
pub const MAX_MESSAGE_LEN: usize = 2_000;
pub const MAX_CAPTION_LEN: usize = 500;
pub const MAX_BIO_LEN: usize = 500;
pub const MAX_TAG_LEN: usize = 50;
pub const USERNAME_LEN: std::ops::RangeInclusive<usize> = 3..=20;
pub const MIN_PASSWORD_LEN: usize = 6;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email pattern"));

/// Trimmed, non-empty, at most `max` characters.
pub fn required_text(field: &str, value: &str, max: usize) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(format!("{field} is required")));
    }
    bounded_text(field, trimmed, max)
}

/// At most `max` characters; empty allowed.
pub fn bounded_text(field: &str, value: &str, max: usize) -> Result<String> {
    if value.chars().count() > max {
        return Err(DomainError::validation(format!(
            "{field} cannot exceed {max} characters"
        )));
    }
    Ok(value.to_string())
}

pub fn username(value: &str) -> Result<String> {
    let name = value.trim();
    if !USERNAME_LEN.contains(&name.chars().count()) {
        return Err(DomainError::validation("username must be 3-20 characters"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DomainError::validation(
            "username can only contain letters, numbers, and underscores",
        ));
    }
    Ok(name.to_string())
}

/// Trimmed and lowercased.
pub fn email(value: &str) -> Result<String> {
    let email = value.trim().to_lowercase();
    if email.is_empty() {
        return Err(DomainError::validation("email is required"));
    }
    if !EMAIL.is_match(&email) {
        return Err(DomainError::validation("invalid email format"));
    }
    Ok(email)
}

pub fn password(value: &str) -> Result<()> {
    if value.chars().count() < MIN_PASSWORD_LEN {
        return Err(DomainError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Trims tags, drops empties and duplicates, keeps first-seen order.
pub fn tags(values: Vec<String>) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for tag in values {
        let tag = bounded_text("tag", tag.trim(), MAX_TAG_LEN)?;
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    Ok(out)
}

pub fn media_type(content_type: &Mime) -> Result<MediaType> {
    MediaType::from_mime(content_type).ok_or_else(|| {
        DomainError::validation(format!(
            "unsupported media type {content_type}; only images and videos are accepted"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_text_trims_and_bounds() {
        assert_eq!(required_text("content", "  hi  ", 10).unwrap(), "hi");
        assert!(required_text("content", "   ", 10).is_err());
        assert!(required_text("content", &"x".repeat(11), 10).is_err());
    }

    #[test]
    fn usernames() {
        assert_eq!(username("alice_01").unwrap(), "alice_01");
        assert!(username("al").is_err());
        assert!(username("bad name").is_err());
        assert!(username(&"a".repeat(21)).is_err());
    }

    #[test]
    fn emails_are_normalised() {
        assert_eq!(email(" Bob@Example.COM ").unwrap(), "bob@example.com");
        assert!(email("not-an-email").is_err());
    }

    #[test]
    fn tags_are_cleaned() {
        let raw = vec![" rust ".into(), "".into(), "rust".into(), "async".into()];
        let cleaned = tags(raw).unwrap();
        assert_eq!(cleaned, vec!["rust".to_string(), "async".to_string()]);
    }
}
