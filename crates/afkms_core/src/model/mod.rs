//! Domain records, input payloads and patch snapshots.
//!
//! # Responsibility
//! - Define the entity rows persisted by `repo`.
//! - Define the typed payloads parsed by `action`.
//! - Define the change-log records owned by the engine.
//!
//! # Invariants
//! - Patch structs are tri-state: absent field = untouched, `null` = clear,
//!   value = set. The same struct is the before/after snapshot of an update.

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        $vis enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub(crate) use string_enum;

pub mod audit;
pub mod change;
pub mod idea;
pub mod inbox;
pub mod journal;
pub mod note;
pub mod route;
pub mod task;

use serde::{Deserialize, Deserializer};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

/// Business-rule or payload-shape violation with a stable upper-snake code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", render_validation(.code, .message))]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Error whose message is the code itself.
    pub fn code(code: &'static str) -> Self {
        Self::new(code, code)
    }
}

fn render_validation(code: &str, message: &str) -> String {
    if message == code {
        code.to_string()
    } else {
        format!("{code}: {message}")
    }
}

/// Deserializes a present field into `Some(..)`, keeping JSON `null` as `Some(None)`.
///
/// Paired with `#[serde(default)]` so an absent field stays `None`.
pub(crate) fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Returns whether `value` is a calendar date in `YYYY-MM-DD` form.
pub fn is_calendar_date(value: &str) -> bool {
    Date::parse(value, format_description!("[year]-[month]-[day]")).is_ok()
}

/// Returns whether `value` is an RFC 3339 timestamp.
pub fn is_rfc3339(value: &str) -> bool {
    OffsetDateTime::parse(value, &Rfc3339).is_ok()
}

pub(crate) fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calendar_dates_must_be_iso() {
        assert!(is_calendar_date("2026-02-28"));
        assert!(!is_calendar_date("2026-02-30"));
        assert!(!is_calendar_date("28/02/2026"));
    }

    #[test]
    fn timestamps_must_be_rfc3339() {
        assert!(is_rfc3339("2026-03-01T10:00:00Z"));
        assert!(is_rfc3339("2026-03-01T10:00:00+08:00"));
        assert!(!is_rfc3339("2026-03-01 10:00"));
    }

    #[test]
    fn validation_error_display_hides_duplicate_message() {
        assert_eq!(ValidationError::code("NO_PATCH_FIELDS").to_string(), "NO_PATCH_FIELDS");
        assert_eq!(
            ValidationError::new("PAYLOAD_INVALID", "missing field `title`").to_string(),
            "PAYLOAD_INVALID: missing field `title`"
        );
    }

    #[test]
    fn validation_error_is_a_std_error_without_source() {
        let err: Box<dyn std::error::Error> = Box::new(ValidationError::code("TOOL_REQUIRED"));
        assert!(err.source().is_none());
        assert_eq!(err.to_string(), "TOOL_REQUIRED");
    }
}
