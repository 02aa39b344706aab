//! Minimal reader for FITS primary headers.
//!
//! The solution artifact returned by the solving service is a header-only FITS file.
//! Only the header is needed to build a [`Wcs`](crate::wcs::Wcs), so data units are never read.
//!
//! A header is a sequence of 80-byte card images, terminated by an `END` card and padded
//! to a multiple of 2880 bytes.

use std::collections::HashMap;

use thiserror::Error;

/// Length of a single header card.
pub const CARD_LEN: usize = 80;
/// Length of a FITS block.
pub const BLOCK_LEN: usize = 2880;

/// Errors while reading a FITS header.
#[derive(Error, Debug)]
pub enum FitsError {
    /// The byte stream ended before the `END` card.
    #[error("FITS header is not terminated by an END card ({cards} cards read)")]
    MissingEnd {
        /// Number of complete cards seen.
        cards: usize,
    },
    /// The first card is not `SIMPLE`.
    #[error("not a FITS file: first keyword is {0:?}")]
    NotFits(String),
    /// A keyword is present but has an unexpected type.
    #[error("keyword {keyword} is not {expected}")]
    WrongType {
        /// Keyword name.
        keyword: String,
        /// Expected type.
        expected: &'static str,
    },
    /// Reading from disk failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Value of a header keyword.
#[derive(Clone, Debug, PartialEq)]
pub enum FitsValue {
    /// Quoted character string.
    String(String),
    /// Integer.
    Integer(i64),
    /// Floating point number, `D` exponents included.
    Float(f64),
    /// Logical `T` or `F`.
    Boolean(bool),
}

impl FitsValue {
    /// Numeric view of the value. Integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FitsValue::Float(f) => Some(*f),
            FitsValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Integer view of the value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FitsValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// String view of the value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FitsValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Keyword-value pairs of a primary header, in file order.
#[derive(Clone, Debug, Default)]
pub struct FitsHeader {
    values: HashMap<String, FitsValue>,
    order: Vec<String>,
}

impl FitsHeader {
    /// Parse the primary header at the start of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FitsError> {
        let mut header = FitsHeader::default();
        let mut cards = 0;

        for card in bytes.chunks_exact(CARD_LEN) {
            cards += 1;
            let card = String::from_utf8_lossy(card);
            let keyword = card.get(..8).unwrap_or(&card).trim_end();

            if cards == 1 && keyword != "SIMPLE" {
                return Err(FitsError::NotFits(keyword.to_string()));
            }
            if keyword == "END" {
                return Ok(header);
            }
            if keyword.is_empty() || card.get(8..10) != Some("= ") {
                // COMMENT, HISTORY and blank cards carry no value.
                continue;
            }
            if let Some(value) = card.get(10..).and_then(parse_value) {
                header.insert(keyword, value);
            }
        }

        Err(FitsError::MissingEnd { cards })
    }

    /// Read and parse the primary header of a file on disk.
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self, FitsError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Insert or replace a keyword.
    pub fn insert(&mut self, keyword: &str, value: FitsValue) {
        if self.values.insert(keyword.to_string(), value).is_none() {
            self.order.push(keyword.to_string());
        }
    }

    /// Raw value of a keyword.
    pub fn get(&self, keyword: &str) -> Option<&FitsValue> {
        self.values.get(keyword)
    }

    /// Numeric value of a keyword. `Ok(None)` if absent.
    pub fn get_f64(&self, keyword: &str) -> Result<Option<f64>, FitsError> {
        self.get(keyword)
            .map(|v| {
                v.as_f64().ok_or_else(|| FitsError::WrongType {
                    keyword: keyword.to_string(),
                    expected: "numeric",
                })
            })
            .transpose()
    }

    /// Integer value of a keyword. `Ok(None)` if absent.
    pub fn get_i64(&self, keyword: &str) -> Result<Option<i64>, FitsError> {
        self.get(keyword)
            .map(|v| {
                v.as_i64().ok_or_else(|| FitsError::WrongType {
                    keyword: keyword.to_string(),
                    expected: "an integer",
                })
            })
            .transpose()
    }

    /// String value of a keyword. `Ok(None)` if absent.
    pub fn get_str(&self, keyword: &str) -> Result<Option<&str>, FitsError> {
        self.get(keyword)
            .map(|v| {
                v.as_str().ok_or_else(|| FitsError::WrongType {
                    keyword: keyword.to_string(),
                    expected: "a string",
                })
            })
            .transpose()
    }

    /// Keywords in file order.
    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Serialize as a header-only FITS byte stream, padded to a whole block.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BLOCK_LEN);
        for keyword in &self.order {
            let value = match &self.values[keyword] {
                FitsValue::String(s) => format!("'{:<8}'", s.replace('\'', "''")),
                FitsValue::Integer(i) => format!("{i:>20}"),
                FitsValue::Float(f) => format!("{f:>20.12E}"),
                FitsValue::Boolean(b) => format!("{:>20}", if *b { "T" } else { "F" }),
            };
            push_card(&mut out, &format!("{keyword:<8}= {value}"));
        }
        push_card(&mut out, "END");
        let padding = (BLOCK_LEN - out.len() % BLOCK_LEN) % BLOCK_LEN;
        out.resize(out.len() + padding, b' ');
        out
    }
}

fn push_card(out: &mut Vec<u8>, card: &str) {
    let mut card = card.as_bytes().to_vec();
    card.resize(CARD_LEN, b' ');
    out.extend_from_slice(&card);
}

/// Parse the value field (columns 11-80) of a card, dropping any inline comment.
fn parse_value(field: &str) -> Option<FitsValue> {
    let field = field.trim_start();

    if let Some(rest) = field.strip_prefix('\'') {
        // Quotes inside strings are doubled.
        let mut value = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    value.push('\'');
                } else {
                    return Some(FitsValue::String(value.trim_end().to_string()));
                }
            } else {
                value.push(c);
            }
        }
        return None;
    }

    let value = field.split('/').next().unwrap_or_default().trim();
    match value {
        "" => None,
        "T" => Some(FitsValue::Boolean(true)),
        "F" => Some(FitsValue::Boolean(false)),
        _ => value
            .parse::<i64>()
            .map(FitsValue::Integer)
            .ok()
            .or_else(|| {
                value
                    .replace(['D', 'd'], "E")
                    .parse::<f64>()
                    .map(FitsValue::Float)
                    .ok()
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(text: &str) -> String {
        format!("{text:<80}")
    }

    fn header_bytes(cards: &[&str]) -> Vec<u8> {
        let mut s: String = cards.iter().map(|c| card(c)).collect();
        s.push_str(&card("END"));
        s.into_bytes()
    }

    #[test]
    fn parses_typed_values() {
        let bytes = header_bytes(&[
            "SIMPLE  =                    T / Standard FITS file",
            "NAXIS   =                    0",
            "CTYPE1  = 'RA---TAN-SIP'       / TAN (gnomonic) projection + SIP distortions",
            "CRVAL1  =        83.8221187017 / RA  of reference point",
            "CD1_1   =  -1.2345678901D-04",
            "COMMENT  this is not a value",
            "OBJECT  = 'O''Brien  '",
        ]);
        let header = FitsHeader::from_bytes(&bytes).unwrap();

        assert_eq!(header.get("SIMPLE"), Some(&FitsValue::Boolean(true)));
        assert_eq!(header.get_i64("NAXIS").unwrap(), Some(0));
        assert_eq!(header.get_str("CTYPE1").unwrap(), Some("RA---TAN-SIP"));
        assert_eq!(header.get_f64("CRVAL1").unwrap(), Some(83.8221187017));
        assert_eq!(header.get_f64("CD1_1").unwrap(), Some(-1.2345678901e-4));
        assert_eq!(header.get_str("OBJECT").unwrap(), Some("O'Brien"));
        assert!(header.get("COMMENT").is_none());
        assert_eq!(header.get_f64("MISSING").unwrap(), None);
    }

    #[test]
    fn integers_widen_to_floats() {
        let bytes = header_bytes(&[
            "SIMPLE  =                    T",
            "CRPIX1  =                 2000",
        ]);
        let header = FitsHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.get_f64("CRPIX1").unwrap(), Some(2000.));
    }

    #[test]
    fn wrong_type_is_reported() {
        let bytes = header_bytes(&["SIMPLE  =                    T", "CTYPE1  = 'RA---TAN'"]);
        let header = FitsHeader::from_bytes(&bytes).unwrap();
        assert!(matches!(
            header.get_f64("CTYPE1"),
            Err(FitsError::WrongType { .. })
        ));
    }

    #[test]
    fn missing_end() {
        let bytes = card("SIMPLE  =                    T").into_bytes();
        assert!(matches!(
            FitsHeader::from_bytes(&bytes),
            Err(FitsError::MissingEnd { cards: 1 })
        ));
    }

    #[test]
    fn rejects_non_fits() {
        let bytes = header_bytes(&["<html>"]);
        assert!(matches!(
            FitsHeader::from_bytes(&bytes),
            Err(FitsError::NotFits(_))
        ));
    }

    #[test]
    fn serialized_header_parses_back() {
        let mut header = FitsHeader::default();
        header.insert("SIMPLE", FitsValue::Boolean(true));
        header.insert("CTYPE1", FitsValue::String("RA---TAN".into()));
        header.insert("A_ORDER", FitsValue::Integer(2));
        header.insert("CRVAL2", FitsValue::Float(-5.25));

        let bytes = header.to_bytes();
        assert_eq!(bytes.len() % BLOCK_LEN, 0);

        let parsed = FitsHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.get_str("CTYPE1").unwrap(), Some("RA---TAN"));
        assert_eq!(parsed.get_i64("A_ORDER").unwrap(), Some(2));
        assert_eq!(parsed.get_f64("CRVAL2").unwrap(), Some(-5.25));
        assert_eq!(
            parsed.keywords().collect::<Vec<_>>(),
            vec!["SIMPLE", "CTYPE1", "A_ORDER", "CRVAL2"]
        );
    }
}
