//! Hierarchical addressing for components, controls, and ports.
//!
//! An address names a node in a root's component tree. Identifier segments
//! are validated; two addresses are equal iff their segment sequences are
//! equal.
//!
//! # Textual forms
//!
//! | Form | Meaning |
//! |------|---------|
//! | `/root/child` | component |
//! | `/root/child.ctl` | control on a component |
//! | `/root/child!out` | port on a component |
//! | `./sub/path`, `./sub.ctl`, `./sub!port` | relative to a base component |
//! | `.ctl`, `!port` | control/port on the base itself |
//!
//! Formatting is lossless: `parse(format(a)) == a` for every valid address.
//!
//! # Example
//!
//! ```
//! use trellis_types::{Address, ComponentAddress, ControlAddress};
//!
//! let base = ComponentAddress::parse("/test/address").unwrap();
//! let resolved = Address::resolve("./to/here.control", &base).unwrap();
//! assert_eq!(resolved.to_string(), "/test/address/to/here.control");
//!
//! let ctl = ControlAddress::parse("/main/osc.frequency").unwrap();
//! assert_eq!(ctl.component().root(), "main");
//! assert_eq!(ctl.control(), "frequency");
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorCode;

/// Failure while reading or building an address.
///
/// All variants classify as "invalid address" to callers; the variant
/// pins down what was wrong for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The address has no segments.
    #[error("address has no segments")]
    Empty,
    /// A segment violates the identifier charset.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),
    /// The text does not follow any address form.
    #[error("malformed address: {0:?}")]
    Malformed(String),
    /// The text parsed, but not as the requested address kind.
    #[error("expected {expected} address: {text:?}")]
    WrongKind {
        /// Kind the caller asked for.
        expected: &'static str,
        /// Offending input.
        text: String,
    },
}

impl ErrorCode for AddressError {
    fn code(&self) -> &'static str {
        match self {
            Self::Empty => "ADDRESS_EMPTY",
            Self::InvalidIdentifier(_) => "ADDRESS_INVALID_IDENTIFIER",
            Self::Malformed(_) => "ADDRESS_MALFORMED",
            Self::WrongKind { .. } => "ADDRESS_WRONG_KIND",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

/// Checks the identifier charset: `[A-Za-z_][A-Za-z0-9_-]*`.
pub fn is_valid_identifier(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn checked_identifier(id: &str) -> Result<String, AddressError> {
    if is_valid_identifier(id) {
        Ok(id.to_string())
    } else {
        Err(AddressError::InvalidIdentifier(id.to_string()))
    }
}

/// Address of a component: a non-empty segment sequence rooted at a root
/// name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentAddress {
    segments: Vec<String>,
}

impl ComponentAddress {
    /// Builds an address from validated segments.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, AddressError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let segments: Vec<String> = segments
            .into_iter()
            .map(|s| checked_identifier(s.as_ref()))
            .collect::<Result<_, _>>()?;
        if segments.is_empty() {
            return Err(AddressError::Empty);
        }
        Ok(Self { segments })
    }

    /// A single-segment address naming a root.
    pub fn root_of(name: &str) -> Result<Self, AddressError> {
        Self::from_segments([name])
    }

    /// Parses the absolute `/seg1/seg2` form.
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        match Address::parse(text)? {
            Address::Component(a) => Ok(a),
            _ => Err(AddressError::WrongKind {
                expected: "component",
                text: text.to_string(),
            }),
        }
    }

    /// The root name (first segment).
    #[must_use]
    pub fn root(&self) -> &str {
        &self.segments[0]
    }

    /// All segments, root first.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The last segment: this component's own id.
    #[must_use]
    pub fn id(&self) -> &str {
        self.segments.last().expect("segments are non-empty")
    }

    /// Number of segments.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// The parent component address, or `None` for a root address.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Appends a child segment.
    pub fn child(&self, id: &str) -> Result<Self, AddressError> {
        let mut segments = self.segments.clone();
        segments.push(checked_identifier(id)?);
        Ok(Self { segments })
    }

    /// The address of `control` on this component.
    pub fn control(&self, control: &str) -> Result<ControlAddress, AddressError> {
        Ok(ControlAddress {
            component: self.clone(),
            control: checked_identifier(control)?,
        })
    }

    /// The address of `port` on this component.
    pub fn port(&self, port: &str) -> Result<PortAddress, AddressError> {
        Ok(PortAddress {
            component: self.clone(),
            port: checked_identifier(port)?,
        })
    }
}

impl std::fmt::Display for ComponentAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for seg in &self.segments {
            write!(f, "/{seg}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for ComponentAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Address of a callable endpoint: component plus control id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlAddress {
    component: ComponentAddress,
    control: String,
}

impl ControlAddress {
    /// Parses the absolute `/seg1/seg2.control` form.
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        match Address::parse(text)? {
            Address::Control(a) => Ok(a),
            _ => Err(AddressError::WrongKind {
                expected: "control",
                text: text.to_string(),
            }),
        }
    }

    /// The owning component's address.
    #[must_use]
    pub fn component(&self) -> &ComponentAddress {
        &self.component
    }

    /// The control id.
    #[must_use]
    pub fn control(&self) -> &str {
        &self.control
    }

    /// The root name this address routes to.
    #[must_use]
    pub fn root(&self) -> &str {
        self.component.root()
    }
}

impl std::fmt::Display for ControlAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.component, self.control)
    }
}

impl std::str::FromStr for ControlAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Address of a connection endpoint: component plus port id.
///
/// Port addresses are never call targets; they exist for topology
/// operations and info.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortAddress {
    component: ComponentAddress,
    port: String,
}

impl PortAddress {
    /// Parses the absolute `/seg1/seg2!port` form.
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        match Address::parse(text)? {
            Address::Port(a) => Ok(a),
            _ => Err(AddressError::WrongKind {
                expected: "port",
                text: text.to_string(),
            }),
        }
    }

    /// The owning component's address.
    #[must_use]
    pub fn component(&self) -> &ComponentAddress {
        &self.component
    }

    /// The port id.
    #[must_use]
    pub fn port(&self) -> &str {
        &self.port
    }
}

impl std::fmt::Display for PortAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}!{}", self.component, self.port)
    }
}

impl std::str::FromStr for PortAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Any of the three address kinds, for generic parsing and resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Address {
    /// A component address.
    Component(ComponentAddress),
    /// A control address.
    Control(ControlAddress),
    /// A port address.
    Port(PortAddress),
}

impl Address {
    /// Parses an absolute address of any kind.
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        let body = text
            .strip_prefix('/')
            .ok_or_else(|| AddressError::Malformed(text.to_string()))?;
        Self::parse_body(body, None)
    }

    /// Resolves `text` against `base`: absolute forms parse as-is, the
    /// relative forms (`./path`, `.ctl`, `!port`) attach to `base`.
    pub fn resolve(text: &str, base: &ComponentAddress) -> Result<Self, AddressError> {
        if text.starts_with('/') {
            return Self::parse(text);
        }
        if let Some(body) = text.strip_prefix("./") {
            return Self::parse_body(body, Some(base));
        }
        if let Some(ctl) = text.strip_prefix('.') {
            return Ok(Self::Control(base.control(ctl)?));
        }
        if let Some(port) = text.strip_prefix('!') {
            return Ok(Self::Port(base.port(port)?));
        }
        Err(AddressError::Malformed(text.to_string()))
    }

    /// Parses `seg1/seg2[.ctl|!port]`, prepending `base`'s segments if any.
    fn parse_body(body: &str, base: Option<&ComponentAddress>) -> Result<Self, AddressError> {
        let (path, suffix) = match body.find(['.', '!']) {
            Some(idx) => {
                let marker = body.as_bytes()[idx] as char;
                (&body[..idx], Some((marker, &body[idx + 1..])))
            }
            None => (body, None),
        };

        let mut segments: Vec<&str> = Vec::new();
        if !path.is_empty() {
            segments.extend(path.split('/'));
        }
        let component = match base {
            Some(base) => {
                let all = base
                    .segments()
                    .iter()
                    .map(String::as_str)
                    .chain(segments.into_iter());
                ComponentAddress::from_segments(all)?
            }
            None => ComponentAddress::from_segments(segments)?,
        };

        match suffix {
            None => Ok(Self::Component(component)),
            Some(('.', ctl)) => Ok(Self::Control(component.control(ctl)?)),
            Some(('!', port)) => Ok(Self::Port(component.port(port)?)),
            Some(_) => unreachable!("find matched '.' or '!'"),
        }
    }

    /// The component part of any address kind.
    #[must_use]
    pub fn component(&self) -> &ComponentAddress {
        match self {
            Self::Component(a) => a,
            Self::Control(a) => a.component(),
            Self::Port(a) => a.component(),
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Component(a) => a.fmt(f),
            Self::Control(a) => a.fmt(f),
            Self::Port(a) => a.fmt(f),
        }
    }
}

impl std::str::FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::check_error_codes;

    #[test]
    fn error_codes() {
        check_error_codes(
            &[
                AddressError::Empty,
                AddressError::InvalidIdentifier("x!".into()),
                AddressError::Malformed("x".into()),
                AddressError::WrongKind {
                    expected: "port",
                    text: "x".into(),
                },
            ],
            "ADDRESS_",
        );
    }

    #[test]
    fn identifier_charset() {
        assert!(is_valid_identifier("abc"));
        assert!(is_valid_identifier("_x9-y"));
        assert!(is_valid_identifier("Root2"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("9abc"));
        assert!(!is_valid_identifier("-lead"));
        assert!(!is_valid_identifier("a.b"));
        assert!(!is_valid_identifier("a b"));
    }

    #[test]
    fn component_round_trip() {
        for text in ["/main", "/main/osc", "/a/b-c/_d/e2"] {
            let addr = ComponentAddress::parse(text).unwrap();
            assert_eq!(addr.to_string(), text);
            assert_eq!(ComponentAddress::parse(&addr.to_string()).unwrap(), addr);
        }
    }

    #[test]
    fn control_round_trip() {
        for text in ["/main.start", "/main/osc.frequency"] {
            let addr = ControlAddress::parse(text).unwrap();
            assert_eq!(addr.to_string(), text);
            assert_eq!(ControlAddress::parse(&addr.to_string()).unwrap(), addr);
        }
    }

    #[test]
    fn port_round_trip() {
        let addr = PortAddress::parse("/main/osc!out").unwrap();
        assert_eq!(addr.to_string(), "/main/osc!out");
        assert_eq!(addr.port(), "out");
        assert_eq!(PortAddress::parse(&addr.to_string()).unwrap(), addr);
    }

    #[test]
    fn structure_accessors() {
        let addr = ComponentAddress::parse("/main/mix/out").unwrap();
        assert_eq!(addr.root(), "main");
        assert_eq!(addr.id(), "out");
        assert_eq!(addr.depth(), 3);
        assert_eq!(addr.parent().unwrap().to_string(), "/main/mix");
        assert!(ComponentAddress::parse("/main").unwrap().parent().is_none());
    }

    #[test]
    fn malformed_rejected() {
        for text in ["", "main", "//a", "/a//b", "/a/", "/a.b.c", "/a!b!c", "/a.b!c", "/9x", "/a .b"] {
            assert!(Address::parse(text).is_err(), "accepted {text:?}");
        }
    }

    #[test]
    fn relative_resolution() {
        let base = ComponentAddress::parse("/test/address").unwrap();
        let cases = [
            ("./to/here", "/test/address/to/here"),
            ("./to/here.control", "/test/address/to/here.control"),
            ("./to/here!port", "/test/address/to/here!port"),
            (".control2", "/test/address.control2"),
        ];
        for (input, expected) in cases {
            let resolved = Address::resolve(input, &base).unwrap();
            assert_eq!(resolved.to_string(), expected, "resolving {input:?}");
        }
    }

    #[test]
    fn relative_port_on_base() {
        let base = ComponentAddress::parse("/test/address").unwrap();
        let resolved = Address::resolve("!out", &base).unwrap();
        assert_eq!(resolved.to_string(), "/test/address!out");
    }

    #[test]
    fn absolute_text_ignores_base() {
        let base = ComponentAddress::parse("/test").unwrap();
        let resolved = Address::resolve("/other/node.go", &base).unwrap();
        assert_eq!(resolved.to_string(), "/other/node.go");
    }

    #[test]
    fn wrong_kind_rejected() {
        assert!(matches!(
            ControlAddress::parse("/a/b"),
            Err(AddressError::WrongKind { expected: "control", .. })
        ));
        assert!(matches!(
            PortAddress::parse("/a/b.ctl"),
            Err(AddressError::WrongKind { expected: "port", .. })
        ));
        assert!(matches!(
            ComponentAddress::parse("/a!p"),
            Err(AddressError::WrongKind { expected: "component", .. })
        ));
    }

    #[test]
    fn equality_is_segment_equality() {
        let a = ComponentAddress::parse("/x/y").unwrap();
        let b = ComponentAddress::from_segments(["x", "y"]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, ComponentAddress::parse("/x").unwrap());
    }
}
