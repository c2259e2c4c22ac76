//! Typed header values and their fixed-format card representation.

use std::fmt;

/// A keyword value held in a metadata record.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// FITS logical value (`T` or `F`).
    Logical(bool),
    /// FITS integer value.
    Integer(i64),
    /// FITS floating-point value.
    Float(f64),
    /// FITS character string (content between single quotes, trailing blanks removed).
    String(String),
}

impl Value {
    /// Returns the string content, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer content, if this is an integer value.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the value as a float; integers are promoted.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Returns the logical content, if this is a logical value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Logical(b) => Some(*b),
            _ => None,
        }
    }

    /// Short name of the variant, used in type mismatch messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Logical(_) => "logical",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Logical(b) => write!(f, "{}", if *b { "T" } else { "F" }),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Logical(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n as i64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Integer(n as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// Width of the value field of a card (bytes 10..80).
pub(crate) const VALUE_FIELD: usize = 70;

/// Parse the value field of a card, returning the value and any inline comment.
///
/// Returns `None` for an undefined value (blank field, possibly with a comment)
/// or for value syntaxes this crate does not model (complex numbers).
pub(crate) fn parse_value_field(field: &str) -> (Option<Value>, Option<String>) {
    let trimmed = field.trim_start();
    if let Some(quoted) = trimmed.strip_prefix('\'') {
        let (content, rest) = split_quoted(quoted);
        return (Some(Value::String(content)), comment_after(rest));
    }

    // Real-world writers sometimes omit the blank after the slash, so a bare
    // ` /` is accepted as the separator.
    let (text, comment) = match field.find(" /").or_else(|| field.find('/').filter(|&i| i == 0)) {
        Some(idx) => (&field[..idx], comment_after(&field[idx..])),
        None => (field, None),
    };
    let text = text.trim();
    if text.is_empty() {
        return (None, comment);
    }
    let value = match text {
        "T" => Some(Value::Logical(true)),
        "F" => Some(Value::Logical(false)),
        _ if is_integer_literal(text) => text.parse::<i64>().ok().map(Value::Integer),
        _ => parse_float_literal(text).map(Value::Float),
    };
    (value, comment)
}

/// Split the remainder of a quoted string at its closing quote.
///
/// Doubled quotes inside the string are a literal quote. An unterminated
/// string keeps everything that was read.
fn split_quoted(s: &str) -> (String, &str) {
    let mut out = String::new();
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            if matches!(chars.peek(), Some((_, '\''))) {
                out.push('\'');
                chars.next();
            } else {
                return (out.trim_end().to_string(), &s[i + 1..]);
            }
        } else {
            out.push(c);
        }
    }
    (out.trim_end().to_string(), "")
}

fn comment_after(rest: &str) -> Option<String> {
    let idx = rest.find('/')?;
    let comment = rest[idx + 1..].strip_prefix(' ').unwrap_or(&rest[idx + 1..]);
    let comment = comment.trim_end();
    (!comment.is_empty()).then(|| comment.to_string())
}

fn is_integer_literal(text: &str) -> bool {
    let digits = text.strip_prefix(['+', '-']).unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Parse a float literal, accepting the FITS `D` exponent.
pub(crate) fn parse_float_literal(text: &str) -> Option<f64> {
    text.trim().replace(['D', 'd'], "E").parse::<f64>().ok()
}

/// Render a value into the fixed 70-byte value field.
///
/// Numbers and logicals are right-justified to column 30; strings start with
/// a quote in column 11 and are padded to at least eight characters.
pub(crate) fn format_value_field(value: &Value) -> String {
    let text = match value {
        Value::Logical(b) => format!("{:>20}", if *b { "T" } else { "F" }),
        Value::Integer(n) => format!("{n:>20}"),
        Value::Float(x) => format!("{:>20}", format_float(*x, 20)),
        Value::String(s) => {
            let escaped = s.replace('\'', "''");
            format!("'{escaped:<8}'")
        }
    };
    format!("{text:<VALUE_FIELD$}")
}

/// Shortest round-tripping representation that fits in `max_len` characters.
pub(crate) fn format_float(x: f64, max_len: usize) -> String {
    if x == 0.0 {
        return String::from("0.0");
    }
    if !x.is_finite() {
        return format!("{x}");
    }
    let shortest = format!("{x:E}");
    if shortest.len() <= max_len {
        return shortest;
    }
    let mut precision = 15usize;
    loop {
        let s = format!("{x:.precision$E}");
        if s.len() <= max_len || precision == 0 {
            return s;
        }
        precision -= 1;
    }
}
