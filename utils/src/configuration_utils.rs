use std::time::Duration;

use tracing::{debug, info, warn};

/// A type that can be read from the string value of an environment variable.
///
/// Unset variables keep the current value. A set variable that does not parse also keeps it,
/// with a warning, so a typo shows up in the logs instead of failing the command.
pub trait ParsableConfigValue: std::fmt::Debug + Sized {
    fn parse_user_value(value: &str) -> Option<Self>;

    /// The value of `env_var` if it is set and parses, `current` otherwise.
    fn resolve(env_var: &str, raw: Option<String>, current: Self) -> Self {
        let Some(raw) = raw else {
            debug!(env_var, value = ?current, "configuration default");
            return current;
        };
        match Self::parse_user_value(&raw) {
            Some(value) => {
                info!(env_var, ?value, "configuration override");
                value
            },
            None => {
                warn!(env_var, raw, "ignoring unparseable configuration value; keeping {current:?}");
                current
            },
        }
    }
}

macro_rules! parse_with_from_str {
    ($($t:ty),+) => {
        $(
            impl ParsableConfigValue for $t {
                fn parse_user_value(value: &str) -> Option<Self> {
                    value.trim().parse().ok()
                }
            }
        )+
    };
}

parse_with_from_str!(u16, u32, i64, f64, String);

/// Sizes take an optional decimal (`KB`, `MB`, `GB`) or binary (`KiB`, `MiB`, `GiB`) unit, so
/// `B2_CLIENT_LARGE_FILE_THRESHOLD=200MB` works.
impl ParsableConfigValue for u64 {
    fn parse_user_value(value: &str) -> Option<Self> {
        parse_byte_size(value)
    }
}

impl ParsableConfigValue for usize {
    fn parse_user_value(value: &str) -> Option<Self> {
        parse_byte_size(value).and_then(|v| usize::try_from(v).ok())
    }
}

fn parse_byte_size(value: &str) -> Option<u64> {
    let value = value.trim();
    let split = value.find(|c: char| !c.is_ascii_digit()).unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let number: u64 = digits.parse().ok()?;
    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1_000,
        "m" | "mb" => 1_000_000,
        "g" | "gb" => 1_000_000_000,
        "kib" => 1 << 10,
        "mib" => 1 << 20,
        "gib" => 1 << 30,
        _ => return None,
    };
    number.checked_mul(multiplier)
}

impl ParsableConfigValue for bool {
    fn parse_user_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "y" | "on" => Some(true),
            "0" | "false" | "no" | "n" | "off" => Some(false),
            _ => None,
        }
    }
}

impl<T: ParsableConfigValue> ParsableConfigValue for Option<T> {
    fn parse_user_value(value: &str) -> Option<Self> {
        // "none" or an empty value clears an optional setting.
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Some(None),
            _ => T::parse_user_value(value).map(Some),
        }
    }
}

/// Durations accept the suffixes understood by `duration_str`, e.g. "250ms", "3s", "2m".
impl ParsableConfigValue for Duration {
    fn parse_user_value(value: &str) -> Option<Self> {
        duration_str::parse(value.trim()).ok()
    }
}
