//! Serde helper for the `"HH:MM:SS"` duration wire format used by [`super::model::ApplicationConfig`].

use std::time::Duration;

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let total = duration.as_secs();
    let (h, rem) = (total / 3600, total % 3600);
    let (m, s) = (rem / 60, rem % 60);
    format!("{h:02}:{m:02}:{s:02}").serialize(serializer)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse(&raw).map_err(D::Error::custom)
}

pub fn parse(raw: &str) -> Result<Duration, String> {
    let parts: Vec<&str> = raw.split(':').collect();
    let (h, m, s) = match parts.as_slice() {
        [h, m, s] => (*h, *m, *s),
        [m, s] => ("0", *m, *s),
        [s] => ("0", "0", *s),
        _ => return Err(format!("invalid duration {raw:?}, expected HH:MM:SS")),
    };
    let h: u64 = h.parse().map_err(|_| format!("invalid hours in {raw:?}"))?;
    let m: u64 = m.parse().map_err(|_| format!("invalid minutes in {raw:?}"))?;
    let s: u64 = s.parse().map_err(|_| format!("invalid seconds in {raw:?}"))?;
    Ok(Duration::from_secs(h * 3600 + m * 60 + s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_form() {
        assert_eq!(parse("00:10:00").unwrap(), Duration::from_secs(600));
    }

    #[test]
    fn parses_short_forms() {
        assert_eq!(parse("5").unwrap(), Duration::from_secs(5));
        assert_eq!(parse("1:30").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse("not-a-duration").is_err());
    }
}
