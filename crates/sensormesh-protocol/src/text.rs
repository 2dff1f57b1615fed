use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum number of characters carried by any text field on the wire.
///
/// Shared by the sensor type, the requested attribute and the response value.
pub const MAX_TEXT_LEN: usize = 20;

/// A string that never holds more than [`MAX_TEXT_LEN`] characters.
///
/// Longer input is silently cut to its first `MAX_TEXT_LEN` chars. The cut
/// always falls on a `char` boundary. Decoding applies the same rule, so an
/// over-long string from a peer is truncated rather than rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct BoundedText(String);

impl BoundedText {
    pub fn new(text: &str) -> Self {
        Self(text[..cut_point(text)].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Byte index at which `text` must be cut to keep `MAX_TEXT_LEN` chars.
fn cut_point(text: &str) -> usize {
    text.char_indices()
        .nth(MAX_TEXT_LEN)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len())
}

impl From<String> for BoundedText {
    fn from(mut text: String) -> Self {
        text.truncate(cut_point(&text));
        Self(text)
    }
}

impl From<&str> for BoundedText {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<&String> for BoundedText {
    fn from(text: &String) -> Self {
        Self::new(text)
    }
}

impl From<BoundedText> for String {
    fn from(text: BoundedText) -> Self {
        text.0
    }
}

impl AsRef<str> for BoundedText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for BoundedText {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for BoundedText {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for BoundedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
