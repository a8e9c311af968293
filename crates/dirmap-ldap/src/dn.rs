//! Distinguished Name algebra for locating directory entries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Peekable;
use std::str::{Chars, FromStr};
use thiserror::Error;

use dirmap_core::error::Error as CoreError;

/// Errors that can occur when parsing or manipulating distinguished names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistinguishedNameError {
    /// The distinguished name has no components.
    #[error("distinguished name has no components")]
    Empty,
    /// A component in the distinguished name was invalid.
    #[error("invalid distinguished name component: {0}")]
    InvalidComponent(String),
    /// A component was missing the attribute name to the left of the `=`.
    #[error("distinguished name component missing attribute: {0}")]
    MissingAttribute(String),
    /// The attribute name is neither a descriptor nor a numeric OID.
    #[error("invalid attribute name `{0}`")]
    InvalidAttribute(String),
    /// A component was missing the value to the right of the `=`.
    #[error("distinguished name component missing value for attribute {0}")]
    MissingValue(String),
    /// The distinguished name ended with an escape character.
    #[error("distinguished name contains an unterminated escape sequence")]
    UnterminatedEscape,
    /// A backslash was followed by something that is neither special nor a hex pair.
    #[error("unknown escape sequence `{0}`")]
    UnknownEscape(String),
    /// A quoted value was never closed.
    #[error("distinguished name contains an unbalanced quote")]
    UnbalancedQuote,
    /// A special character appeared unescaped inside a value.
    #[error("unescaped `{0}` in attribute value")]
    UnescapedSpecial(char),
    /// Hex escapes decoded to bytes that are not UTF-8.
    #[error("escaped bytes are not valid UTF-8")]
    InvalidUtf8,
}

impl From<DistinguishedNameError> for CoreError {
    fn from(err: DistinguishedNameError) -> Self {
        CoreError::MalformedDn(err.to_string())
    }
}

/// Relative distinguished name (single attribute/value pair).
///
/// Equality ignores ASCII case in the attribute name and compares values exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelativeDistinguishedName {
    attribute: String,
    value: String,
}

impl RelativeDistinguishedName {
    /// Create a new relative distinguished name.
    #[must_use]
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Parses a single `attribute=value` component.
    ///
    /// # Errors
    ///
    /// Returns [`DistinguishedNameError`] if the text is malformed or holds more than one
    /// component.
    pub fn parse(input: impl AsRef<str>) -> std::result::Result<Self, DistinguishedNameError> {
        let dn = DistinguishedName::parse(input.as_ref())?;
        match dn.rdns.len() {
            1 => Ok(dn.rdns.into_iter().next().ok_or(DistinguishedNameError::Empty)?),
            0 => Err(DistinguishedNameError::Empty),
            _ => Err(DistinguishedNameError::InvalidComponent(
                input.as_ref().to_string(),
            )),
        }
    }

    /// Attribute portion of the RDN (e.g. `cn`).
    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Attribute value portion of the RDN.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns true if this RDN matches the provided attribute name (case-insensitive).
    #[must_use]
    pub fn matches_attribute(&self, attribute: &str) -> bool {
        self.attribute.eq_ignore_ascii_case(attribute)
    }
}

impl PartialEq for RelativeDistinguishedName {
    fn eq(&self, other: &Self) -> bool {
        self.matches_attribute(&other.attribute) && self.value == other.value
    }
}

impl Eq for RelativeDistinguishedName {}

impl fmt::Display for RelativeDistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.attribute, escape(&self.value))
    }
}

/// Strongly-typed distinguished name, most-specific component first.
///
/// The structure keeps a canonical string representation while providing access to the
/// individual relative distinguished names. An empty DN denotes the directory base itself.
/// Parsing is strict so malformed DNs surface before any directory call is made.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DistinguishedName {
    raw: String,
    rdns: Vec<RelativeDistinguishedName>,
}

impl DistinguishedName {
    /// The empty distinguished name.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            raw: String::new(),
            rdns: Vec::new(),
        }
    }

    /// Parses a distinguished name from a string. Blank input yields the empty DN.
    ///
    /// # Errors
    ///
    /// Returns [`DistinguishedNameError`] on unescaped separators, unbalanced quoting, unknown
    /// escape sequences or components without an attribute or value.
    pub fn parse(input: impl AsRef<str>) -> std::result::Result<Self, DistinguishedNameError> {
        let input = input.as_ref();
        if input.trim().is_empty() {
            return Ok(Self::empty());
        }

        let mut chars = input.chars().peekable();
        let mut rdns = Vec::new();
        loop {
            rdns.push(parse_rdn(&mut chars, input)?);
            match chars.next() {
                None => break,
                Some(',') => {
                    if chars.clone().all(char::is_whitespace) {
                        return Err(DistinguishedNameError::InvalidComponent(input.to_string()));
                    }
                }
                Some(other) => return Err(DistinguishedNameError::UnescapedSpecial(other)),
            }
        }

        Ok(Self::from_rdns(rdns))
    }

    fn from_rdns(rdns: Vec<RelativeDistinguishedName>) -> Self {
        Self {
            raw: rdns_to_string(&rdns),
            rdns,
        }
    }

    /// Borrows the canonical distinguished name string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the relative distinguished names in order.
    #[must_use]
    pub fn rdns(&self) -> &[RelativeDistinguishedName] {
        &self.rdns
    }

    /// Number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    /// Returns true for the empty DN.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Looks up the value for the first attribute that matches `attribute` (case-insensitive).
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.rdns
            .iter()
            .find(|rdn| rdn.matches_attribute(attribute))
            .map(RelativeDistinguishedName::value)
    }

    /// The leading (most-specific) component.
    ///
    /// # Errors
    ///
    /// Returns [`DistinguishedNameError::Empty`] for the empty DN.
    pub fn first_rdn(&self) -> std::result::Result<&RelativeDistinguishedName, DistinguishedNameError> {
        self.rdns.first().ok_or(DistinguishedNameError::Empty)
    }

    /// Everything after the leading component.
    ///
    /// # Errors
    ///
    /// Returns [`DistinguishedNameError::Empty`] for the empty DN.
    pub fn without_first_rdn(&self) -> std::result::Result<Self, DistinguishedNameError> {
        match self.rdns.split_first() {
            Some((_, rest)) => Ok(Self::from_rdns(rest.to_vec())),
            None => Err(DistinguishedNameError::Empty),
        }
    }

    /// Creates a new distinguished name by prefixing the provided RDN.
    #[must_use]
    pub fn with_prefix(mut self, rdn: RelativeDistinguishedName) -> Self {
        self.rdns.insert(0, rdn);
        self.raw = rdns_to_string(&self.rdns);
        self
    }

    /// Creates a new distinguished name by appending another distinguished name.
    ///
    /// This combines a base-relative location with a directory base.
    #[must_use]
    pub fn join(mut self, suffix: &DistinguishedName) -> Self {
        self.rdns.extend(suffix.rdns.iter().cloned());
        self.raw = rdns_to_string(&self.rdns);
        self
    }

    /// Child components followed by base components.
    #[must_use]
    pub fn concat(child: &DistinguishedName, base: &DistinguishedName) -> Self {
        child.clone().join(base)
    }
}

impl PartialEq for DistinguishedName {
    fn eq(&self, other: &Self) -> bool {
        self.rdns == other.rdns
    }
}

impl Eq for DistinguishedName {}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for DistinguishedName {
    type Err = DistinguishedNameError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<DistinguishedName> for String {
    fn from(value: DistinguishedName) -> Self {
        value.raw
    }
}

impl From<RelativeDistinguishedName> for DistinguishedName {
    fn from(rdn: RelativeDistinguishedName) -> Self {
        Self::from_rdns(vec![rdn])
    }
}

impl TryFrom<&str> for DistinguishedName {
    type Error = DistinguishedNameError;

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<String> for DistinguishedName {
    type Error = DistinguishedNameError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(value)
    }
}

/// A DN-valued argument given either as a parsed DN or as DN text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnLike {
    /// Already-parsed distinguished name.
    Dn(DistinguishedName),
    /// Text in DN syntax.
    Text(String),
}

impl DnLike {
    /// Resolves the value to a distinguished name.
    ///
    /// # Errors
    ///
    /// Returns [`DistinguishedNameError`] if text does not parse.
    pub fn into_dn(self) -> std::result::Result<DistinguishedName, DistinguishedNameError> {
        match self {
            Self::Dn(dn) => Ok(dn),
            Self::Text(text) => DistinguishedName::parse(text),
        }
    }
}

impl From<DistinguishedName> for DnLike {
    fn from(dn: DistinguishedName) -> Self {
        Self::Dn(dn)
    }
}

impl From<&DistinguishedName> for DnLike {
    fn from(dn: &DistinguishedName) -> Self {
        Self::Dn(dn.clone())
    }
}

impl From<RelativeDistinguishedName> for DnLike {
    fn from(rdn: RelativeDistinguishedName) -> Self {
        Self::Dn(rdn.into())
    }
}

impl From<&str> for DnLike {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for DnLike {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Coerces a DN or DN text into a [`DistinguishedName`].
///
/// # Errors
///
/// Returns [`DistinguishedNameError`] if text does not parse.
pub fn coerce_to_dn(
    value: impl Into<DnLike>,
) -> std::result::Result<DistinguishedName, DistinguishedNameError> {
    value.into().into_dn()
}

type CharStream<'a> = Peekable<Chars<'a>>;

fn parse_rdn(
    chars: &mut CharStream<'_>,
    input: &str,
) -> std::result::Result<RelativeDistinguishedName, DistinguishedNameError> {
    let mut attribute = String::new();
    loop {
        match chars.next() {
            Some('=') => break,
            Some(',') | None => {
                return Err(DistinguishedNameError::InvalidComponent(input.to_string()));
            }
            Some(ch) => attribute.push(ch),
        }
    }

    let attribute = attribute.trim();
    if attribute.is_empty() {
        return Err(DistinguishedNameError::MissingAttribute(input.to_string()));
    }
    if !is_valid_attribute(attribute) {
        return Err(DistinguishedNameError::InvalidAttribute(
            attribute.to_string(),
        ));
    }

    while chars.next_if_eq(&' ').is_some() {}
    let value = if chars.next_if_eq(&'"').is_some() {
        parse_quoted_value(chars)?
    } else {
        parse_value(chars)?
    };

    if value.is_empty() {
        return Err(DistinguishedNameError::MissingValue(attribute.to_string()));
    }

    Ok(RelativeDistinguishedName::new(attribute, value))
}

fn parse_value(chars: &mut CharStream<'_>) -> std::result::Result<String, DistinguishedNameError> {
    let mut bytes = Vec::new();
    // Unescaped trailing spaces are not part of the value.
    let mut significant = 0;

    while let Some(&ch) = chars.peek() {
        match ch {
            ',' => break,
            '\\' => {
                chars.next();
                parse_escape(chars, &mut bytes)?;
                significant = bytes.len();
            }
            '+' | ';' | '<' | '>' | '"' => return Err(DistinguishedNameError::UnescapedSpecial(ch)),
            ' ' => {
                chars.next();
                bytes.push(b' ');
            }
            _ => {
                chars.next();
                push_char(&mut bytes, ch);
                significant = bytes.len();
            }
        }
    }

    bytes.truncate(significant);
    String::from_utf8(bytes).map_err(|_| DistinguishedNameError::InvalidUtf8)
}

fn parse_quoted_value(
    chars: &mut CharStream<'_>,
) -> std::result::Result<String, DistinguishedNameError> {
    let mut bytes = Vec::new();
    loop {
        match chars.next() {
            None => return Err(DistinguishedNameError::UnbalancedQuote),
            Some('"') => break,
            Some('\\') => parse_escape(chars, &mut bytes)?,
            Some(ch) => push_char(&mut bytes, ch),
        }
    }

    while chars.next_if_eq(&' ').is_some() {}
    match chars.peek() {
        None | Some(',') => {}
        Some(&other) => return Err(DistinguishedNameError::UnescapedSpecial(other)),
    }

    String::from_utf8(bytes).map_err(|_| DistinguishedNameError::InvalidUtf8)
}

fn parse_escape(
    chars: &mut CharStream<'_>,
    bytes: &mut Vec<u8>,
) -> std::result::Result<(), DistinguishedNameError> {
    let first = chars
        .next()
        .ok_or(DistinguishedNameError::UnterminatedEscape)?;

    if is_escapable(first) {
        push_char(bytes, first);
        return Ok(());
    }

    if let Some(high) = first.to_digit(16) {
        let second = chars
            .next()
            .ok_or(DistinguishedNameError::UnterminatedEscape)?;
        let low = second
            .to_digit(16)
            .ok_or_else(|| DistinguishedNameError::UnknownEscape(format!("\\{first}{second}")))?;
        // Both digits are < 16, so the pair always fits in a byte.
        bytes.push(u8::try_from(high * 16 + low).unwrap_or_default());
        return Ok(());
    }

    Err(DistinguishedNameError::UnknownEscape(format!("\\{first}")))
}

fn push_char(bytes: &mut Vec<u8>, ch: char) {
    let mut buf = [0u8; 4];
    bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
}

fn is_escapable(ch: char) -> bool {
    matches!(
        ch,
        ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' | '#' | ' '
    )
}

fn is_valid_attribute(attribute: &str) -> bool {
    let mut chars = attribute.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
        }
        Some(first) if first.is_ascii_digit() => {
            !attribute.ends_with('.')
                && !attribute.contains("..")
                && attribute.chars().all(|ch| ch.is_ascii_digit() || ch == '.')
        }
        _ => false,
    }
}

fn escape(value: &str) -> String {
    let count = value.chars().count();
    let mut escaped = String::with_capacity(value.len());

    for (idx, ch) in value.chars().enumerate() {
        let is_first = idx == 0;
        let is_last = idx + 1 == count;

        if ch == '\0' {
            escaped.push_str("\\00");
            continue;
        }

        let needs_escape = matches!(ch, ',' | '+' | '"' | '\\' | '<' | '>' | ';')
            || (is_first && (ch == ' ' || ch == '#'))
            || (is_last && ch == ' ');

        if needs_escape {
            escaped.push('\\');
        }
        escaped.push(ch);
    }

    escaped
}

fn rdns_to_string(rdns: &[RelativeDistinguishedName]) -> String {
    rdns.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_dn() {
        let dn = DistinguishedName::parse("cn=John Doe,ou=People,dc=example,dc=com").unwrap();
        assert_eq!(dn.len(), 4);
        assert_eq!(dn.get("cn"), Some("John Doe"));
        assert_eq!(dn.get("OU"), Some("People"));
        assert_eq!(dn.to_string(), "cn=John Doe,ou=People,dc=example,dc=com");
    }

    #[test]
    fn parse_tolerates_spacing_around_components() {
        let dn = DistinguishedName::parse(" cn = alice , ou=people").unwrap();
        assert_eq!(dn.to_string(), "cn=alice,ou=people");
    }

    #[test]
    fn parse_dn_with_escape() {
        let dn = DistinguishedName::parse("cn=Smith\\, John,ou=People,dc=example,dc=com").unwrap();
        assert_eq!(dn.get("cn"), Some("Smith, John"));
        assert!(dn.to_string().starts_with("cn=Smith\\, John,ou=People"));
    }

    #[test]
    fn parse_hex_escapes() {
        let dn = DistinguishedName::parse("cn=Jos\\C3\\A9,o=a\\2Cb").unwrap();
        assert_eq!(dn.rdns()[0].value(), "José");
        assert_eq!(dn.rdns()[1].value(), "a,b");
        assert_eq!(dn.to_string(), "cn=José,o=a\\,b");
    }

    #[test]
    fn parse_quoted_value() {
        let dn = DistinguishedName::parse("cn=\"Smith, John\",ou=People").unwrap();
        assert_eq!(dn.get("cn"), Some("Smith, John"));
        assert_eq!(dn.to_string(), "cn=Smith\\, John,ou=People");
    }

    #[test]
    fn escaped_edge_spaces_are_kept() {
        let dn = DistinguishedName::parse("cn=\\ padded\\ ,ou=x").unwrap();
        assert_eq!(dn.get("cn"), Some(" padded "));
        assert_eq!(DistinguishedName::parse(dn.as_str()).unwrap(), dn);
    }

    #[test]
    fn blank_input_is_empty_dn() {
        assert!(DistinguishedName::parse("").unwrap().is_empty());
        assert!(DistinguishedName::parse("   ").unwrap().is_empty());
        assert_eq!(DistinguishedName::empty().to_string(), "");
    }

    #[test]
    fn invalid_trailing_delimiter() {
        let err = DistinguishedName::parse("cn=John,").unwrap_err();
        assert!(matches!(err, DistinguishedNameError::InvalidComponent(_)));
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        assert!(matches!(
            DistinguishedName::parse("cn=a,,dc=b").unwrap_err(),
            DistinguishedNameError::InvalidComponent(_)
        ));
        assert!(matches!(
            DistinguishedName::parse("cn").unwrap_err(),
            DistinguishedNameError::InvalidComponent(_)
        ));
        assert!(matches!(
            DistinguishedName::parse("=alice").unwrap_err(),
            DistinguishedNameError::MissingAttribute(_)
        ));
        assert!(matches!(
            DistinguishedName::parse("cn=").unwrap_err(),
            DistinguishedNameError::MissingValue(_)
        ));
        assert!(matches!(
            DistinguishedName::parse("c n=alice").unwrap_err(),
            DistinguishedNameError::InvalidAttribute(_)
        ));
        assert_eq!(
            DistinguishedName::parse("cn=a+uid=b").unwrap_err(),
            DistinguishedNameError::UnescapedSpecial('+')
        );
        assert_eq!(
            DistinguishedName::parse("cn=\"open").unwrap_err(),
            DistinguishedNameError::UnbalancedQuote
        );
        assert_eq!(
            DistinguishedName::parse("cn=a\"b").unwrap_err(),
            DistinguishedNameError::UnescapedSpecial('"')
        );
        assert_eq!(
            DistinguishedName::parse("cn=a\\q").unwrap_err(),
            DistinguishedNameError::UnknownEscape("\\q".to_string())
        );
        assert_eq!(
            DistinguishedName::parse("cn=a\\").unwrap_err(),
            DistinguishedNameError::UnterminatedEscape
        );
        assert_eq!(
            DistinguishedName::parse("cn=\\FF").unwrap_err(),
            DistinguishedNameError::InvalidUtf8
        );
    }

    #[test]
    fn numeric_oid_attribute() {
        let dn = DistinguishedName::parse("2.5.4.3=alice").unwrap();
        assert_eq!(dn.get("2.5.4.3"), Some("alice"));
        assert!(DistinguishedName::parse("2.5..3=alice").is_err());
    }

    #[test]
    fn equality_ignores_attribute_case_only() {
        let lower = DistinguishedName::parse("cn=alice,ou=people").unwrap();
        let upper = DistinguishedName::parse("CN=alice,OU=people").unwrap();
        let other_value = DistinguishedName::parse("cn=Alice,ou=people").unwrap();
        assert_eq!(lower, upper);
        assert_ne!(lower, other_value);
    }

    #[test]
    fn first_rdn_and_remainder() {
        let dn = DistinguishedName::parse("cn=alice,ou=people").unwrap();
        assert_eq!(
            dn.first_rdn().unwrap(),
            &RelativeDistinguishedName::new("cn", "alice")
        );
        assert_eq!(dn.without_first_rdn().unwrap().to_string(), "ou=people");

        let single = DistinguishedName::parse("ou=people").unwrap();
        assert!(single.without_first_rdn().unwrap().is_empty());

        let empty = DistinguishedName::empty();
        assert_eq!(empty.first_rdn().unwrap_err(), DistinguishedNameError::Empty);
        assert_eq!(
            empty.without_first_rdn().unwrap_err(),
            DistinguishedNameError::Empty
        );
    }

    #[test]
    fn with_prefix_and_join() {
        let base = DistinguishedName::parse("ou=People,dc=example,dc=com").unwrap();
        let user_rdn = RelativeDistinguishedName::new("cn", "Jane Doe");
        let user_dn = base.clone().with_prefix(user_rdn);
        assert_eq!(
            user_dn.to_string(),
            "cn=Jane Doe,ou=People,dc=example,dc=com"
        );

        let full = DistinguishedName::parse("uid=1234").unwrap().join(&base);
        assert_eq!(full.to_string(), "uid=1234,ou=People,dc=example,dc=com");
    }

    #[test]
    fn concat_with_empty_sides() {
        let base = DistinguishedName::parse("dc=example,dc=com").unwrap();
        let empty = DistinguishedName::empty();
        assert_eq!(DistinguishedName::concat(&empty, &base), base);
        assert_eq!(DistinguishedName::concat(&base, &empty), base);
    }

    #[test]
    fn rdn_parse_single_component() {
        let rdn = RelativeDistinguishedName::parse("cn=alice").unwrap();
        assert_eq!(rdn.attribute(), "cn");
        assert_eq!(rdn.value(), "alice");
        assert!(RelativeDistinguishedName::parse("cn=a,ou=b").is_err());
        assert_eq!(
            RelativeDistinguishedName::parse("").unwrap_err(),
            DistinguishedNameError::Empty
        );
    }

    #[test]
    fn coerce_accepts_text_and_dn() {
        let parsed = DistinguishedName::parse("ou=people").unwrap();
        assert_eq!(coerce_to_dn("ou=people").unwrap(), parsed);
        assert_eq!(coerce_to_dn(parsed.clone()).unwrap(), parsed);
        assert_eq!(coerce_to_dn(String::from("ou=people")).unwrap(), parsed);
        assert!(coerce_to_dn("").unwrap().is_empty());
        assert!(coerce_to_dn("ou").is_err());
    }

    #[test]
    fn serde_uses_string_form() {
        let dn = DistinguishedName::parse("cn=alice,ou=people").unwrap();
        let json = serde_json::to_string(&dn).unwrap();
        assert_eq!(json, "\"cn=alice,ou=people\"");
        let back: DistinguishedName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dn);
        assert!(serde_json::from_str::<DistinguishedName>("\"cn\"").is_err());
    }

    #[test]
    fn converts_into_core_error() {
        let err: CoreError = DistinguishedNameError::UnbalancedQuote.into();
        assert!(matches!(err, CoreError::MalformedDn(_)));
    }
}
