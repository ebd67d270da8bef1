//! Zone names and forwarded ports.

use std::fmt;
use std::ops::Range;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Longest name the zone tools accept.
pub const MAX_ZONE_NAME_LEN: usize = 64;

/// Host ports handed out for the zone's SSH redirect.
pub const ZONE_PORT_RANGE: Range<u16> = 1025..65534;

const RESERVED_NAME: &str = "global";
const RESERVED_PREFIX: &str = "SUNW";
const SUFFIX_LEN: usize = 12;
const FALLBACK_BASE: &str = "zone";

/// Reasons a zone name or port is rejected.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum IdentityError {
    /// The name is empty.
    #[error("zone name must not be empty")]
    Empty,
    /// The name exceeds [`MAX_ZONE_NAME_LEN`].
    #[error("zone name '{0}' is longer than {MAX_ZONE_NAME_LEN} characters")]
    TooLong(String),
    /// The name does not start with an ASCII letter or digit.
    #[error("zone name '{0}' must start with a letter or digit")]
    InvalidStart(String),
    /// The name contains a character outside `[A-Za-z0-9_.-]`.
    #[error("zone name '{name}' contains invalid character '{character}'")]
    InvalidCharacter {
        /// Offending name.
        name: String,
        /// First disallowed character.
        character: char,
    },
    /// The name is reserved by the operating system.
    #[error("zone name '{0}' is reserved")]
    Reserved(String),
    /// The port lies outside [`ZONE_PORT_RANGE`].
    #[error("zone port {0} is outside the ephemeral range 1025-65533")]
    PortOutOfRange(u16),
}

/// A validated zone name.
///
/// Names start with an ASCII letter or digit, use only `[A-Za-z0-9_.-]`, are
/// at most 64 characters long, and are neither `global` nor prefixed with
/// `SUNW`.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ZoneName(String);

impl ZoneName {
    /// Validates `value` as a zone name.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] describing the first rule `value` breaks.
    pub fn parse(value: &str) -> Result<Self, IdentityError> {
        let Some(first) = value.chars().next() else {
            return Err(IdentityError::Empty);
        };
        if value.chars().count() > MAX_ZONE_NAME_LEN {
            return Err(IdentityError::TooLong(value.to_owned()));
        }
        if !first.is_ascii_alphanumeric() {
            return Err(IdentityError::InvalidStart(value.to_owned()));
        }
        if let Some(character) = value.chars().find(|ch| !is_name_char(*ch)) {
            return Err(IdentityError::InvalidCharacter {
                name: value.to_owned(),
                character,
            });
        }
        if value == RESERVED_NAME || value.starts_with(RESERVED_PREFIX) {
            return Err(IdentityError::Reserved(value.to_owned()));
        }
        Ok(Self(value.to_owned()))
    }

    /// Derives a unique name from `base` by sanitising it and appending a
    /// random suffix.
    ///
    /// Disallowed characters become `-`, leading punctuation is dropped and
    /// the base is shortened so the result fits the length limit. The result
    /// always satisfies [`ZoneName::parse`].
    ///
    /// # Examples
    ///
    /// ```
    /// use zonewright::zone::ZoneName;
    ///
    /// let name = ZoneName::generate("ci run/42");
    /// assert!(name.as_str().starts_with("ci-run-42-"));
    /// assert!(ZoneName::parse(name.as_str()).is_ok());
    /// ```
    #[must_use]
    pub fn generate(base: &str) -> Self {
        let suffix: String = Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(SUFFIX_LEN)
            .collect();
        Self::with_suffix(base, &suffix)
    }

    fn with_suffix(base: &str, suffix: &str) -> Self {
        let sanitised: String = base
            .chars()
            .map(|ch| if is_name_char(ch) { ch } else { '-' })
            .skip_while(|ch| !ch.is_ascii_alphanumeric())
            .collect();

        let mut stem = if sanitised.is_empty() {
            String::from(FALLBACK_BASE)
        } else {
            sanitised
        };
        if stem.starts_with(RESERVED_PREFIX) {
            stem.insert(0, 'z');
        }

        let budget = MAX_ZONE_NAME_LEN.saturating_sub(suffix.len().saturating_add(1));
        let truncated: String = stem.chars().take(budget).collect();
        Self(format!("{truncated}-{suffix}"))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

const fn is_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-')
}

impl fmt::Display for ZoneName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ZoneName {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ZoneName> for String {
    fn from(value: ZoneName) -> Self {
        value.0
    }
}

/// Name and forwarded port fixed for one zone when configuration resolves.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ZoneIdentity {
    /// Zone name.
    pub name: ZoneName,
    /// Host port redirected to the zone's SSH daemon.
    pub port: u16,
}

impl ZoneIdentity {
    /// Pairs `name` with an explicit `port`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::PortOutOfRange`] when `port` lies outside
    /// [`ZONE_PORT_RANGE`].
    pub fn new(name: ZoneName, port: u16) -> Result<Self, IdentityError> {
        if !ZONE_PORT_RANGE.contains(&port) {
            return Err(IdentityError::PortOutOfRange(port));
        }
        Ok(Self { name, port })
    }

    /// Pairs `name` with a random port from [`ZONE_PORT_RANGE`].
    #[must_use]
    pub fn with_random_port(name: ZoneName) -> Self {
        let port = rand::thread_rng().gen_range(ZONE_PORT_RANGE);
        Self { name, port }
    }

    /// Generates a fresh name from `base` and a random port.
    #[must_use]
    pub fn generate(base: &str) -> Self {
        Self::with_random_port(ZoneName::generate(base))
    }
}
