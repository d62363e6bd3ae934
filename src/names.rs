//! XML name validation and utilities
//!
//! Character classes for XML names are shared by the XPath lexer, the
//! schema parser (variable and parameter names must be NCNames) and the
//! abstract-pattern parameter substitution, which needs to know where a
//! `$name` token ends.

use crate::error::{schema_error, Result, SchemaErrorKind};

/// Check if a character may start an XML name (colon excluded)
pub fn is_name_start_char(c: char) -> bool {
    matches!(c,
        'A'..='Z' | '_' | 'a'..='z'
        | '\u{C0}'..='\u{D6}' | '\u{D8}'..='\u{F6}' | '\u{F8}'..='\u{2FF}'
        | '\u{370}'..='\u{37D}' | '\u{37F}'..='\u{1FFF}' | '\u{200C}'..='\u{200D}'
        | '\u{2070}'..='\u{218F}' | '\u{2C00}'..='\u{2FEF}' | '\u{3001}'..='\u{D7FF}'
        | '\u{F900}'..='\u{FDCF}' | '\u{FDF0}'..='\u{FFFD}' | '\u{10000}'..='\u{EFFFF}')
}

/// Check if a character may appear inside an XML name (colon excluded)
pub fn is_name_char(c: char) -> bool {
    is_name_start_char(c)
        || matches!(c,
            '-' | '.' | '0'..='9' | '\u{B7}' | '\u{300}'..='\u{36F}' | '\u{203F}'..='\u{2040}')
}

/// Check if a string is a valid NCName (non-colonized name)
pub fn is_valid_ncname(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if is_name_start_char(first) => chars.all(is_name_char),
        _ => false,
    }
}

/// Check if a string is a valid QName (qualified name)
pub fn is_valid_qname(name: &str) -> bool {
    match name.split_once(':') {
        Some((prefix, local)) => is_valid_ncname(prefix) && is_valid_ncname(local),
        None => is_valid_ncname(name),
    }
}

/// Validate a variable or parameter name declared in a schema
pub fn validate_variable_name(name: &str, element: &str) -> Result<()> {
    if is_valid_qname(name) {
        Ok(())
    } else {
        Err(schema_error(
            SchemaErrorKind::InvalidStructure,
            format!("invalid name '{}' on <{}>", name, element),
        ))
    }
}

/// Length in bytes of the name starting at the beginning of `text`
///
/// Names may carry a single prefix (`p:local`), matching the variable
/// reference syntax of XPath.
pub fn name_prefix_len(text: &str) -> usize {
    let mut end = 0;
    let mut seen_colon = false;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        let ok = if idx == 0 {
            is_name_start_char(c)
        } else if c == ':' && !seen_colon {
            // only part of the name if a local part follows
            match chars.peek() {
                Some(&(_, next)) if is_name_start_char(next) => {
                    seen_colon = true;
                    true
                }
                _ => false,
            }
        } else {
            is_name_char(c)
        };
        if !ok {
            break;
        }
        end = idx + c.len_utf8();
    }
    end
}
