//! Lenient semantic-version parsing.

use semver::Version;

use crate::error::SpecError;

/// Parse a version string into a [`Version`], filling in missing components.
///
/// Accepts `1`, `1.2`, `1.2.3` and a trailing pre-release tag with or without
/// a hyphen, so `21.11b1` parses as `21.11.0-b1`.
///
/// # Errors
/// Returns [`SpecError::InvalidVersion`] if the string does not start with a
/// number or the normalized form is not valid semver.
pub fn parse_version(text: &str) -> Result<Version, SpecError> {
    parse_version_parts(text).map(|(version, _)| version)
}

/// Parse a version and also report how many numeric components were written.
pub(crate) fn parse_version_parts(text: &str) -> Result<(Version, usize), SpecError> {
    let trimmed = text.trim();
    let mut numbers: Vec<&str> = Vec::with_capacity(3);
    let mut rest = trimmed;

    while numbers.len() < 3 {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            break;
        }
        let (number, tail) = rest.split_at(digits);
        numbers.push(number);
        rest = tail;
        match rest.strip_prefix('.') {
            Some(tail) if numbers.len() < 3 && tail.starts_with(|c: char| c.is_ascii_digit()) => {
                rest = tail;
            }
            _ => break,
        }
    }

    let Some(major) = numbers.first() else {
        return Err(SpecError::InvalidVersion {
            version: text.to_owned(),
            reason: "expected a leading number".to_owned(),
        });
    };
    let minor = numbers.get(1).copied().unwrap_or("0");
    let patch = numbers.get(2).copied().unwrap_or("0");

    let suffix = if rest.is_empty() || rest.starts_with('-') || rest.starts_with('+') {
        rest.to_owned()
    } else {
        format!("-{rest}")
    };

    let normalized = format!("{major}.{minor}.{patch}{suffix}");
    let version = Version::parse(&normalized).map_err(|e| SpecError::InvalidVersion {
        version: text.to_owned(),
        reason: e.to_string(),
    })?;
    Ok((version, numbers.len()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn full_version() {
        assert_eq!(parse_version("1.2.3").unwrap(), Version::new(1, 2, 3));
    }

    #[test]
    fn missing_components_default_to_zero() {
        assert_eq!(parse_version("1").unwrap(), Version::new(1, 0, 0));
        assert_eq!(parse_version("1.2").unwrap(), Version::new(1, 2, 0));
    }

    #[test]
    fn component_count_reported() {
        assert_eq!(parse_version_parts("1").unwrap().1, 1);
        assert_eq!(parse_version_parts("1.2").unwrap().1, 2);
        assert_eq!(parse_version_parts("1.2.3").unwrap().1, 3);
    }

    #[test]
    fn prerelease_without_hyphen() {
        let v = parse_version("21.11b1").unwrap();
        assert_eq!(v.to_string(), "21.11.0-b1");
    }

    #[test]
    fn prerelease_with_hyphen() {
        let v = parse_version("1.0.0-rc.1").unwrap();
        assert_eq!(v.to_string(), "1.0.0-rc.1");
    }

    #[test]
    fn surrounding_whitespace_ignored() {
        assert_eq!(parse_version("  2.0.1 ").unwrap(), Version::new(2, 0, 1));
    }

    #[test]
    fn rejects_non_numeric() {
        let err = parse_version("latest").unwrap_err();
        assert!(err.to_string().contains("latest"), "error was: {err}");
    }

    #[test]
    fn rejects_empty() {
        assert!(parse_version("").is_err());
    }

    #[test]
    fn prerelease_orders_before_release() {
        assert!(parse_version("1.0.0b1").unwrap() < parse_version("1.0.0").unwrap());
    }

    proptest! {
        #[test]
        fn never_panics(text in "\\PC{0,24}") {
            let _ = parse_version(&text);
        }

        #[test]
        fn plain_triples_round_trip(major in 0u64..1000, minor in 0u64..1000, patch in 0u64..1000) {
            let text = format!("{major}.{minor}.{patch}");
            prop_assert_eq!(parse_version(&text).unwrap().to_string(), text);
        }
    }
}
