//! Lenient deserializers for config fields.
//!
//! Placeholder substitution always produces strings, so `max_rows: ${MAX_ROWS:500}`
//! arrives as `"500"`. These helpers accept either the native scalar or its
//! string form.

use serde::de::{self, Deserializer};
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(untagged)]
enum OrString<T> {
    Native(T),
    Text(String),
}

pub fn u64_lenient<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match OrString::<u64>::deserialize(deserializer)? {
        OrString::Native(n) => Ok(n),
        OrString::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("expected an unsigned integer, got '{s}'"))),
    }
}

pub fn usize_lenient<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    let n = u64_lenient(deserializer)?;
    usize::try_from(n).map_err(de::Error::custom)
}

pub fn f64_lenient<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match OrString::<f64>::deserialize(deserializer)? {
        OrString::Native(n) => Ok(n),
        OrString::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("expected a number, got '{s}'"))),
    }
}

pub fn bool_lenient<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match OrString::<bool>::deserialize(deserializer)? {
        OrString::Native(b) => Ok(b),
        OrString::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" | "" => Ok(false),
            _ => Err(de::Error::custom(format!("expected a boolean, got '{s}'"))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Limits {
        #[serde(deserialize_with = "u64_lenient")]
        rows: u64,
        #[serde(deserialize_with = "f64_lenient")]
        size_mb: f64,
        #[serde(default, deserialize_with = "bool_lenient")]
        hidden: bool,
    }

    #[test]
    fn accepts_native_scalars() {
        let l: Limits = serde_yaml::from_str("rows: 10\nsize_mb: 2\nhidden: true\n").unwrap();
        assert_eq!(l.rows, 10);
        assert_eq!(l.size_mb, 2.0);
        assert!(l.hidden);
    }

    #[test]
    fn accepts_substituted_strings() {
        let l: Limits = serde_yaml::from_str("rows: '500'\nsize_mb: '1.5'\nhidden: 'false'\n").unwrap();
        assert_eq!(l.rows, 500);
        assert_eq!(l.size_mb, 1.5);
        assert!(!l.hidden);
    }

    #[test]
    fn rejects_garbage() {
        let err = serde_yaml::from_str::<Limits>("rows: lots\nsize_mb: 1\n").unwrap_err();
        assert!(err.to_string().contains("lots"));
    }
}
