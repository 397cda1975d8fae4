//! PCI Bus/Device/Function (BDF) address value type
//!
//! Accepts `B:D.F`, `B:D:F`, `S:B:D.F`, `S:B:D:F` and any of these wrapped
//! in `BDF(...)`. Components are hexadecimal; a missing segment defaults
//! to 0. Canonical output form is `SSSS:BB:DD:F` with uppercase hex.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

/// BDF parse/validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BdfError {
    /// Not a recognizable BDF string
    #[error("Invalid BDF format: '{0}'")]
    InvalidFormat(String),

    /// A component exceeded its PCI range
    #[error("BDF out of range: {0}")]
    OutOfRange(String),
}

/// Regex matching a BDF substring inside arbitrary text. Segment optional.
fn bdf_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:[0-9a-fA-F]{1,4}:)?[0-9a-fA-F]{1,2}:[0-9a-fA-F]{1,2}[:.][0-9a-fA-F]")
            .unwrap()
    })
}

/// A validated PCI address `(segment, bus, device, function)`.
///
/// Immutable value; freely copyable; hashable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bdf {
    pub segment: u16,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl Bdf {
    pub const fn new(segment: u16, bus: u8, device: u8, function: u8) -> Self {
        Self {
            segment,
            bus,
            device,
            function,
        }
    }

    /// Parse a BDF string in any accepted input form.
    pub fn parse(input: &str) -> Result<Self, BdfError> {
        let trimmed = input.trim();
        let body = trimmed
            .strip_prefix("BDF(")
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or(trimmed);

        if body.is_empty() {
            return Err(BdfError::InvalidFormat(input.to_string()));
        }

        let components: Vec<u32> = body
            .split(|c| c == ':' || c == '.')
            .map(|part| {
                u32::from_str_radix(part, 16)
                    .map_err(|_| BdfError::InvalidFormat(input.to_string()))
            })
            .collect::<Result<_, _>>()?;

        let (segment, bus, device, function) = match components.as_slice() {
            [b, d, f] => (0, *b, *d, *f),
            [s, b, d, f] => (*s, *b, *d, *f),
            _ => return Err(BdfError::InvalidFormat(input.to_string())),
        };

        if segment > 65535 {
            return Err(BdfError::OutOfRange(format!(
                "segment {segment:#x} can't be greater than 65535"
            )));
        }
        if bus > 255 {
            return Err(BdfError::OutOfRange(format!(
                "bus {bus:#x} can't be greater than 255"
            )));
        }
        if device > 31 {
            return Err(BdfError::OutOfRange(format!(
                "device {device:#x} can't be greater than 31"
            )));
        }
        if function > 7 {
            return Err(BdfError::OutOfRange(format!(
                "function {function:#x} can't be greater than 7"
            )));
        }

        Ok(Self {
            segment: segment as u16,
            bus: bus as u8,
            device: device as u8,
            function: function as u8,
        })
    }

    /// Membership test: extract every BDF-shaped substring from `text` and
    /// return true if any of them parses to this address.
    pub fn contained_in(&self, text: &str) -> bool {
        bdf_regex()
            .find_iter(text)
            .any(|m| Bdf::parse(m.as_str()).map(|b| b == *self).unwrap_or(false))
    }
}

impl fmt::Display for Bdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04X}:{:02X}:{:02X}:{}",
            self.segment, self.bus, self.device, self.function
        )
    }
}

impl std::str::FromStr for Bdf {
    type Err = BdfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Bdf::parse(s)
    }
}

/// String comparison parses the other side; an empty or invalid string
/// compares unequal to every BDF.
impl PartialEq<str> for Bdf {
    fn eq(&self, other: &str) -> bool {
        if other.is_empty() {
            return false;
        }
        Bdf::parse(other).map(|b| b == *self).unwrap_or(false)
    }
}

impl PartialEq<&str> for Bdf {
    fn eq(&self, other: &&str) -> bool {
        self == *other
    }
}

impl Serialize for Bdf {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_parse_three_component_defaults_segment() {
        let bdf = Bdf::parse("00:00.0").unwrap();
        assert_eq!(bdf, Bdf::new(0, 0, 0, 0));
        assert_eq!(bdf.to_string(), "0000:00:00:0");
    }

    #[test]
    fn test_parse_four_component_upper_bounds() {
        let bdf = Bdf::parse("ffff:FF:1f.7").unwrap();
        assert_eq!(bdf, Bdf::new(65535, 255, 31, 7));
        assert_eq!(bdf.to_string(), "FFFF:FF:1F:7");
    }

    #[test]
    fn test_parse_colon_separated_function() {
        assert_eq!(Bdf::parse("0000:23:00:0").unwrap(), Bdf::new(0, 0x23, 0, 0));
        assert_eq!(Bdf::parse("23:00:0").unwrap(), Bdf::new(0, 0x23, 0, 0));
    }

    #[test]
    fn test_parse_wrapped_form() {
        assert_eq!(
            Bdf::parse("BDF(0000:03:00.1)").unwrap(),
            Bdf::new(0, 3, 0, 1)
        );
    }

    #[test]
    fn test_parse_rejects_bad_inputs() {
        // function 0..7, device 0..31, hex digits only, 3-4 components
        assert!(matches!(
            Bdf::parse("00:00.8"),
            Err(BdfError::OutOfRange(_))
        ));
        assert!(matches!(
            Bdf::parse("00:20.0"),
            Err(BdfError::OutOfRange(_))
        ));
        assert!(matches!(
            Bdf::parse("00:00.Z"),
            Err(BdfError::InvalidFormat(_))
        ));
        assert!(matches!(
            Bdf::parse("AAAA:00:AA.0"),
            Err(BdfError::OutOfRange(_))
        ));
        assert!(matches!(Bdf::parse(""), Err(BdfError::InvalidFormat(_))));
        assert!(matches!(Bdf::parse("00"), Err(BdfError::InvalidFormat(_))));
    }

    #[test]
    fn test_one_past_each_bound_fails() {
        assert!(Bdf::parse("10000:00:00.0").is_err());
        assert!(Bdf::parse("100:00.0").is_err());
        assert!(Bdf::parse("00:20.0").is_err());
        assert!(Bdf::parse("00:1f.8").is_err());
        // All bounds exactly at the limit round-trip
        let max = Bdf::parse("ffff:ff:1f.7").unwrap();
        assert_eq!(Bdf::parse(&max.to_string()).unwrap(), max);
    }

    #[test]
    fn test_canonical_idempotence() {
        for input in ["00:00.0", "ffff:FF:1f.7", "0:3:0.1", "BDF(0000:23:00.2)"] {
            let parsed = Bdf::parse(input).unwrap();
            assert_eq!(Bdf::parse(&parsed.to_string()).unwrap(), parsed);
        }
    }

    #[test]
    fn test_string_equality() {
        let bdf = Bdf::new(0, 3, 0, 0);
        assert!(bdf == "0000:03:00.0");
        assert!(bdf == "03:00.0");
        assert!(bdf == "3:0.0");
        assert!(bdf != "");
        assert!(bdf != "not a bdf");
        assert!(bdf != "0000:03:00.1");
    }

    #[test]
    fn test_contained_in() {
        let bdf = Bdf::new(0, 0x23, 0, 0);
        assert!(bdf.contained_in("ID:0 | BDF:0000:23:00.0 | UUID:ffffffff"));
        assert!(!bdf.contained_in("ID:1 | BDF:0000:24:00.0"));
        assert!(!bdf.contained_in(""));
    }

    #[test]
    fn test_hash_on_canonical_form() {
        let mut set = HashSet::new();
        set.insert(Bdf::parse("03:00.0").unwrap());
        assert!(set.contains(&Bdf::parse("0000:03:00:0").unwrap()));
    }
}
