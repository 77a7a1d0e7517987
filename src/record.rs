//! Record model.

use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::num::ParseIntError;

/// Separator between the number and the text parts of a line.
pub const SEPARATOR: &str = ". ";

/// Line parsing error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line has no `". "` separator.
    MissingSeparator,
    /// The part before the separator is not an integer.
    InvalidNumber(ParseIntError),
}

impl Error for ParseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            ParseError::MissingSeparator => None,
            ParseError::InvalidNumber(err) => Some(err),
        }
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            ParseError::MissingSeparator => write!(f, "separator \"{}\" not found", SEPARATOR),
            ParseError::InvalidNumber(err) => write!(f, "number part is not an integer: {}", err),
        }
    }
}

/// A single `"<number>. <text>"` line.
///
/// Records are ordered by `text` (byte-wise), then by `number`, then by `sequence`.
/// `sequence` is only used by the merger to tell apart records with equal keys coming
/// from different runs, it is never written out.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "memory-limit", derive(deepsize::DeepSizeOf))]
pub struct Record {
    pub number: i64,
    pub text: String,
    pub sequence: u64,
}

impl Record {
    pub fn new(number: i64, text: impl Into<String>) -> Self {
        Record {
            number,
            text: text.into(),
            sequence: 0,
        }
    }

    /// Parses a line. Only the first occurrence of `". "` splits the number from the text.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let (number, text) = line.split_once(SEPARATOR).ok_or(ParseError::MissingSeparator)?;
        let number = number.trim().parse::<i64>().map_err(ParseError::InvalidNumber)?;

        return Ok(Record::new(number, text));
    }

    /// Checks whether the line carries no record and should be skipped.
    pub fn is_blank(line: &str) -> bool {
        line.trim().is_empty()
    }

    /// Compares records ignoring the merge tie-breaker.
    pub fn cmp_key(&self, other: &Self) -> Ordering {
        self.text.cmp(&other.text).then(self.number.cmp(&other.number))
    }
}

impl PartialOrd for Record {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Record {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_key(other).then(self.sequence.cmp(&other.sequence))
    }
}

impl Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.number, SEPARATOR, self.text)
    }
}

#[cfg(test)]
mod test {
    use std::cmp::Ordering;

    use rstest::*;

    use super::{ParseError, Record};

    #[rstest]
    #[case("415. Apple", 415, "Apple")]
    #[case("1. Apple", 1, "Apple")]
    #[case("-7. negative", -7, "negative")]
    #[case("3. Mr. Smith. Jr. ", 3, "Mr. Smith. Jr. ")]
    #[case("12. ", 12, "")]
    #[case(" 42 . padded number", 42, "padded number")]
    fn test_parse(#[case] line: &str, #[case] number: i64, #[case] text: &str) {
        let record = Record::parse(line).unwrap();
        assert_eq!(record, Record::new(number, text));
    }

    #[rstest]
    #[case("not a record")]
    #[case("5.Apple")]
    #[case("")]
    fn test_parse_missing_separator(#[case] line: &str) {
        assert_eq!(Record::parse(line), Err(ParseError::MissingSeparator));
    }

    #[rstest]
    #[case("five. Apple")]
    #[case(". Apple")]
    #[case("99999999999999999999. overflow")]
    fn test_parse_invalid_number(#[case] line: &str) {
        assert!(matches!(Record::parse(line), Err(ParseError::InvalidNumber(_))));
    }

    #[test]
    fn test_display_skips_sequence() {
        let mut record = Record::parse("30432. Something something something").unwrap();
        record.sequence = 17;
        assert_eq!(record.to_string(), "30432. Something something something");
    }

    #[rstest]
    #[case(Record::new(1, "Apple"), Record::new(415, "Apple"), Ordering::Less)]
    #[case(Record::new(415, "Apple"), Record::new(2, "Banana is yellow"), Ordering::Less)]
    #[case(Record::new(5, "apple"), Record::new(5, "Apple"), Ordering::Greater)]
    #[case(Record::new(5, "Apple"), Record::new(5, "Apple"), Ordering::Equal)]
    #[case(Record::new(-1, "x"), Record::new(0, "x"), Ordering::Less)]
    #[case(Record::new(9, "Ab"), Record::new(1, "Abc"), Ordering::Less)]
    fn test_compare(#[case] a: Record, #[case] b: Record, #[case] expected: Ordering) {
        assert_eq!(a.cmp(&b), expected);
        assert_eq!(b.cmp(&a), expected.reverse());
    }

    #[test]
    fn test_sequence_breaks_ties() {
        let mut first = Record::new(5, "Apple");
        let mut second = Record::new(5, "Apple");
        first.sequence = 3;
        second.sequence = 4;

        assert_eq!(first.cmp(&second), Ordering::Less);
        assert_eq!(first.cmp_key(&second), Ordering::Equal);
    }

    #[test]
    fn test_is_blank() {
        assert!(Record::is_blank(""));
        assert!(Record::is_blank(" \t "));
        assert!(!Record::is_blank("1. a"));
    }
}
