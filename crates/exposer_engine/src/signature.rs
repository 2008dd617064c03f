/* 📖 # Why parse parameter lists from text?

Rust closures carry no parameter names at runtime, yet the wire format is a JSON object keyed
by those names. API authors therefore declare the parameter list the way a function header
would spell it, e.g. `(a, b = 1, {c: {d}})`, and this module turns that text into the
positional name list. Defaults are dropped, destructuring patterns are kept as their compact
pattern text, and rest parameters are refused because a named payload cannot address them.
*/

use exposer_base::error::ErrorKind;
use exposer_base::{ExposerError, ExposerResult};

fn unsupported(signature: &str, message: impl Into<String>) -> Box<ExposerError> {
    Box::new(ExposerError::new(ErrorKind::UnsupportedSignature {
        signature: signature.to_string(),
        message: message.into(),
    }))
}

/// Whether `name` is a plain identifier (`[A-Za-z_$][A-Za-z0-9_$]*`).
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Extract the positional parameter names from a declared parameter list.
///
/// Surrounding parentheses are optional and an empty list yields no names.
pub fn param_names(signature: &str) -> ExposerResult<Vec<String>> {
    let inner = strip_parentheses(signature.trim());
    let positions = split_top_level(inner, ',').map_err(|message| unsupported(inner, message))?;

    let mut positions: Vec<&str> = positions.iter().map(|p| p.trim()).collect();
    if positions.len() == 1 && positions[0].is_empty() {
        return Ok(vec![]);
    }
    // A single trailing comma is accepted, as in function headers
    if positions.len() > 1 && positions.last().is_some_and(|p| p.is_empty()) {
        positions.pop();
    }

    let names = positions
        .into_iter()
        .enumerate()
        .map(|(index, position)| {
            if position.is_empty() {
                return Err(unsupported(
                    inner,
                    format!("parameter {} is empty", index + 1),
                ));
            }
            parse_position(position).map_err(|message| unsupported(inner, message))
        })
        .collect::<ExposerResult<Vec<String>>>()?;
    check_unique(inner, names)
}

/// Refuse a parameter list naming the same parameter twice; the payload key would be ambiguous.
pub fn check_unique(signature: &str, names: Vec<String>) -> ExposerResult<Vec<String>> {
    for (index, name) in names.iter().enumerate() {
        if names[..index].contains(name) {
            return Err(unsupported(
                signature,
                format!("parameter '{}' is declared twice", name),
            ));
        }
    }
    Ok(names)
}

/// Check a single explicitly supplied parameter name.
pub fn check_param_name(name: &str) -> ExposerResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(unsupported(name, "parameter name is empty"));
    }
    parse_position(trimmed).map_err(|message| unsupported(name, message))
}

fn strip_parentheses(text: &str) -> &str {
    match text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        Some(inner) => inner.trim(),
        None => text,
    }
}

/// Split at `separator` where it occurs outside brackets and string literals.
fn split_top_level(text: &str, separator: char) -> Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut stack: Vec<char> = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (offset, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '(' => stack.push(')'),
            '[' => stack.push(']'),
            '{' => stack.push('}'),
            ')' | ']' | '}' => {
                if stack.pop() != Some(c) {
                    return Err(format!("unbalanced '{}'", c));
                }
            }
            _ if c == separator && stack.is_empty() => {
                parts.push(&text[start..offset]);
                start = offset + c.len_utf8();
            }
            _ => {}
        }
    }
    if quote.is_some() {
        return Err("unterminated string literal".to_string());
    }
    if let Some(open) = stack.pop() {
        return Err(format!("missing '{}'", open));
    }
    parts.push(&text[start..]);
    Ok(parts)
}

fn parse_position(position: &str) -> Result<String, String> {
    // Everything after the first top-level '=' is a default value
    let declared = split_top_level(position, '=')?
        .first()
        .map(|p| p.trim())
        .unwrap_or_default();

    if let Some(rest) = declared.strip_prefix("...") {
        return Err(format!("rest parameter '{}' is not supported", rest.trim()));
    }
    if declared.starts_with('{') || declared.starts_with('[') {
        let close = if declared.starts_with('{') { '}' } else { ']' };
        if !declared.ends_with(close) {
            return Err(format!("malformed destructuring pattern '{}'", declared));
        }
        return Ok(declared.chars().filter(|c| !c.is_whitespace()).collect());
    }
    if declared.is_empty() {
        return Err("parameter name is empty".to_string());
    }
    if !is_identifier(declared) {
        return Err(format!("'{}' is not a valid parameter name", declared));
    }
    Ok(declared.to_string())
}
