//! Typed access to string metadata values.

use uuid::Uuid;

/// A type that can be stored as a metadata string.
///
/// Parsing failures are not errors: getters fall back to the caller's
/// default, the same as for a missing key.
pub trait MetadataValue: Sized {
    /// Parse a stored value, `None` if it does not convert.
    fn from_metadata(raw: &str) -> Option<Self>;

    /// String form to store. An empty string removes the key.
    fn to_metadata(&self) -> String;
}

impl MetadataValue for String {
    fn from_metadata(raw: &str) -> Option<Self> {
        Some(raw.to_string())
    }

    fn to_metadata(&self) -> String {
        self.clone()
    }
}

impl MetadataValue for bool {
    fn from_metadata(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        }
    }

    fn to_metadata(&self) -> String {
        self.to_string()
    }
}

macro_rules! parsed_metadata_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl MetadataValue for $ty {
                fn from_metadata(raw: &str) -> Option<Self> {
                    raw.trim().parse().ok()
                }

                fn to_metadata(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

parsed_metadata_value!(i32, i64, u32, u64, usize, f64, Uuid);

/// Convert an optional raw value, falling back on absence or parse failure.
pub fn convert_or<T: MetadataValue>(raw: Option<&str>, fallback: T) -> T {
    raw.and_then(T::from_metadata).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_and_bools() {
        assert_eq!(convert_or::<i64>(Some(" 42 "), 0), 42);
        assert_eq!(convert_or::<i64>(Some("forty"), -1), -1);
        assert_eq!(convert_or::<u32>(None, 7), 7);
        assert!(convert_or::<bool>(Some("Yes"), false));
        assert!(!convert_or::<bool>(Some("maybe"), false));
    }

    #[test]
    fn test_uuid_round_trip() {
        let id = Uuid::new_v4();
        let stored = id.to_metadata();
        assert_eq!(Uuid::from_metadata(&stored), Some(id));
        assert_eq!(Uuid::from_metadata("nope"), None);
    }

    #[test]
    fn test_string_is_verbatim() {
        assert_eq!(String::from_metadata("  padded ").as_deref(), Some("  padded "));
    }
}
