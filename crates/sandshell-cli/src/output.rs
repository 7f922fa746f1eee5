//! Shell-consumable output helpers.
//!
//! Commands that produce values print them as variable bindings a shell
//! can `eval`: `NAME=value` for scalars and `NAME=(v1 v2 ...)` for
//! arrays. Names are validated as shell identifiers before anything is
//! printed.

use std::fmt::Display;

/// Whether `name` is a legal shell identifier.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Renders a scalar binding.
#[must_use]
pub fn scalar(name: &str, value: impl Display) -> String {
    format!("{name}={value}")
}

/// Renders an array binding.
#[must_use]
pub fn array<I>(name: &str, values: I) -> String
where
    I: IntoIterator,
    I::Item: Display,
{
    let joined = values
        .into_iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    format!("{name}=({joined})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_validate() {
        assert!(is_valid_name("FD"));
        assert!(is_valid_name("_tmp0"));
        assert!(!is_valid_name("0fd"));
        assert!(!is_valid_name("a-b"));
        assert!(!is_valid_name(""));
    }

    #[test]
    fn scalar_bindings_render() {
        assert_eq!(scalar("FD", 3), "FD=3");
    }

    #[test]
    fn array_bindings_render() {
        assert_eq!(array("FDS", [3, 4, 5]), "FDS=(3 4 5)");
        assert_eq!(array("FDS", Vec::<i32>::new()), "FDS=()");
    }
}
