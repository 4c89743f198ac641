//! Image tag placeholders in the descriptor and detection of leftover template tokens.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// The placeholder written where the image tag goes.
pub const TAG_PLACEHOLDER: &str = "{{TAG}}";

static TAG_SLOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*TAG\s*\}\}").expect("tag slot pattern is valid"));

static TRAILING_TAG_SLOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":\{\{\s*TAG\s*\}\}$").expect("tag slot pattern is valid"));

static VALID_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("tag pattern is valid")
});

static TEMPLATE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{[^{}]*\}\}|\$\{[^{}]*\}").expect("template token pattern is valid")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("'{0}' is not a valid image tag")]
    InvalidTag(String),

    #[error("image '{0}' must end with ':{{{{TAG}}}}' and contain no other placeholder")]
    MissingTagSlot(String),
}

pub fn validate_tag(tag: &str) -> Result<(), TemplateError> {
    if VALID_TAG.is_match(tag) {
        Ok(())
    } else {
        Err(TemplateError::InvalidTag(tag.to_string()))
    }
}

/// Checks that an image reference carries exactly one tag placeholder, in tag position.
pub fn validate_image_template(image: &str) -> Result<(), TemplateError> {
    if TAG_SLOT.find_iter(image).count() == 1 && TRAILING_TAG_SLOT.is_match(image) {
        Ok(())
    } else {
        Err(TemplateError::MissingTagSlot(image.to_string()))
    }
}

pub fn substitute_tag(template: &str, tag: &str) -> Result<String, TemplateError> {
    validate_tag(tag)?;
    Ok(TAG_SLOT.replace_all(template, tag).into_owned())
}

/// Every `{{ ... }}` or `${ ... }` token still present in `document`.
pub fn unresolved_tokens(document: &str) -> Vec<String> {
    TEMPLATE_TOKEN
        .find_iter(document)
        .map(|m| m.as_str().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_tag_tolerates_spacing() {
        assert_eq!(
            substitute_tag("ghcr.io/aare/scraper:{{ TAG }}", "v1.2.3").unwrap(),
            "ghcr.io/aare/scraper:v1.2.3"
        );
        assert_eq!(
            substitute_tag("ghcr.io/aare/scraper:{{TAG}}", "sha-3f2a1c").unwrap(),
            "ghcr.io/aare/scraper:sha-3f2a1c"
        );
    }

    #[test]
    fn test_invalid_tags_are_rejected() {
        for tag in ["", "-leading-dash", "has space", "a:b", "{{TAG}}"] {
            assert_eq!(
                substitute_tag("img:{{TAG}}", tag),
                Err(TemplateError::InvalidTag(tag.to_string())),
                "{tag:?}"
            );
        }
        assert!(validate_tag(&"a".repeat(128)).is_ok());
        assert!(validate_tag(&"a".repeat(129)).is_err());
    }

    #[test]
    fn test_image_template_needs_single_trailing_slot() {
        assert!(validate_image_template("registry.local/aare-scraper:{{TAG}}").is_ok());
        assert!(validate_image_template("registry.local:5000/aare-scraper:{{ TAG }}").is_ok());
        assert!(validate_image_template("registry.local/aare-scraper:latest").is_err());
        assert!(validate_image_template("registry.local/{{TAG}}/aare-scraper:{{TAG}}").is_err());
        assert!(validate_image_template("registry.local/aare-scraper@{{TAG}}").is_err());
    }

    #[test]
    fn test_unresolved_tokens() {
        let document = "image: scraper:{{TAG}}\nname: ${NAME}\nvalue: plain {braces}\n";
        assert_eq!(unresolved_tokens(document), vec!["{{TAG}}", "${NAME}"]);
        assert!(unresolved_tokens("image: scraper:v1\n").is_empty());
    }
}
