use std::env;

/// Parse a boolean flag from a string value, or return the given default value otherwise.
///
/// Accepts `1/0`, `true/false`, `yes/no` and `on/off`, case-insensitive. Anything else yields the default.
pub fn parse_boolean_flag(value: Option<String>, default: bool) -> bool {
    let Some(value) = value else {
        return default;
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

/// Convenience wrapper around [`parse_boolean_flag`] that reads the named environment variable.
pub fn env_flag(name: &str, default: bool) -> bool {
    parse_boolean_flag(env::var(name).ok(), default)
}
