//! Small helpers shared by the transports and the services.
use std::fmt;

/// A server version, compared component by component (`6.1` < `7.0` < `8.0`).
///
/// Trailing zero components are ignored, so `7.0` and `7` are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version(Vec<u64>);

impl Version {
    pub fn new(components: &[u64]) -> Self {
        let mut components = components.to_vec();
        while components.last() == Some(&0) {
            components.pop();
        }
        Self(components)
    }

    /// Parses strings such as `6.1`, `7.0-20130101` or `8.0rc1`.
    ///
    /// Everything after the first `-` is dropped, as is any non numeric tail.
    /// Returns `None` when the string does not start with a number.
    pub fn parse(version: &str) -> Option<Self> {
        let version = version.split('-').next().unwrap_or_default().trim();

        let mut components = Vec::new();
        for part in version.split('.') {
            let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
            let Ok(component) = digits.parse::<u64>() else {
                break;
            };
            components.push(component);
            if digits.len() != part.len() {
                break;
            }
        }

        if components.is_empty() {
            None
        } else {
            Some(Self::new(&components))
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("0");
        }
        let parts: Vec<String> = self.0.iter().map(u64::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_compare() {
        assert_eq!(Version::parse("7.0"), Some(Version::new(&[7])));
        assert_eq!(Version::parse("6.1-20120530-233320"), Some(Version::new(&[6, 1])));
        assert_eq!(Version::parse("8.0rc1"), Some(Version::new(&[8])));
        assert_eq!(Version::parse("saas~17.2"), None);
        assert_eq!(Version::parse(""), None);

        assert!(Version::new(&[6, 0]) < Version::new(&[6, 1]));
        assert!(Version::new(&[6, 1]) < Version::new(&[7]));
        assert!(Version::new(&[10]) > Version::new(&[9, 9]));
        assert_eq!(Version::new(&[7, 0, 0]).to_string(), "7");
    }
}
