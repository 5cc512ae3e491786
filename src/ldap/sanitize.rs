//! Validation of untrusted strings before they reach a filter or a DN.
//!
//! Values are rejected, never stripped or escaped: a rejected value must be
//! treated like a failed authentication.

use super::error::{AuthError, Grammar};

/// Token replaced by the validated value in every template.
pub const PLACEHOLDER: &str = "%s";

/// Characters changing the meaning of a filter (RFC 4515).
const FILTER_SPECIALS: &[char] = &['\0', '(', ')', '*', '\\'];
/// Characters changing how a DN is parsed (RFC 4514).
const DN_SPECIALS: &[char] = &[
    '\0', '(', ')', '*', '\\', ',', '=', '\'', '"', '#', '+', ';', '<', '>',
];
/// Group filters are whole expressions, so parentheses are legal.
const GROUP_FILTER_SPECIALS: &[char] = &['\0', '*', '\\'];
/// Group bases are whole DNs, so `,` and `=` are legal.
const GROUP_DN_SPECIALS: &[char] =
    &['\0', '(', ')', '*', '\\', '\'', '"', '#', '+', ';', '<', '>'];

fn has_outer_space(value: &str) -> bool {
    value.starts_with(' ') || value.ends_with(' ')
}

fn reject(grammar: Grammar, value: &str) -> AuthError {
    tracing::error!(%grammar, value, "input contains invalid characters");
    AuthError::SanitizeRejected { grammar }
}

/// Check `value` against the filter grammar.
pub fn check_filter_value(value: &str) -> Result<(), AuthError> {
    if value.contains(FILTER_SPECIALS) {
        return Err(reject(Grammar::Filter, value));
    }
    Ok(())
}

/// Check `value` against the DN grammar.
pub fn check_dn_value(value: &str) -> Result<(), AuthError> {
    if value.contains(DN_SPECIALS) || has_outer_space(value) {
        return Err(reject(Grammar::Dn, value));
    }
    Ok(())
}

/// Substitute a filter-safe `value` into `template`.
pub fn filter(template: &str, value: &str) -> Result<String, AuthError> {
    check_filter_value(value)?;
    Ok(template.replace(PLACEHOLDER, value))
}

/// Substitute a DN-safe `value` into `template`.
pub fn dn(template: &str, value: &str) -> Result<String, AuthError> {
    check_dn_value(value)?;
    Ok(template.replace(PLACEHOLDER, value))
}

/// Validate a configured group filter expression.
pub fn group_filter(filter: &str) -> Result<&str, AuthError> {
    if filter.contains(GROUP_FILTER_SPECIALS) {
        return Err(reject(Grammar::GroupFilter, filter));
    }
    Ok(filter)
}

/// Validate a configured group search base.
pub fn group_dn(dn: &str) -> Result<&str, AuthError> {
    if dn.contains(GROUP_DN_SPECIALS) || has_outer_space(dn) {
        return Err(reject(Grammar::GroupDn, dn));
    }
    Ok(dn)
}
