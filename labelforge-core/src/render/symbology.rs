//! 1D barcode and QR module encoders
//!
//! Encoders only produce module patterns (`true` = dark). Drawing them at a
//! size is the renderer's job.

use qrcode::{Color, EcLevel, QrCode};
use thiserror::Error;

use crate::templates::{BarcodeFormat, ErrorCorrection};

pub const CODE128_MAX_LEN: usize = 48;

#[derive(Debug, Error, PartialEq)]
pub enum SymbologyError {
    #[error("empty payload")]
    Empty,

    #[error("{format} cannot encode '{ch}'")]
    UnsupportedChar { format: &'static str, ch: char },

    #[error("{format} payload too long ({len} > {max})")]
    TooLong { format: &'static str, len: usize, max: usize },

    #[error("{format} expects {expected} digits, got '{value}'")]
    DigitCount { format: &'static str, expected: &'static str, value: String },

    #[error("{format} check digit mismatch: expected {expected}, got {actual}")]
    CheckDigit { format: &'static str, expected: u8, actual: u8 },

    #[error("QR encoding failed: {0}")]
    Qr(String),
}

/// Square QR module matrix, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrMatrix {
    pub width: usize,
    pub modules: Vec<bool>,
}

impl QrMatrix {
    pub fn is_dark(&self, x: usize, y: usize) -> bool {
        self.modules.get(y * self.width + x).copied().unwrap_or(false)
    }
}

pub fn qr_matrix(value: &str, ecc: ErrorCorrection) -> Result<QrMatrix, SymbologyError> {
    if value.is_empty() {
        return Err(SymbologyError::Empty);
    }
    let level = match ecc {
        ErrorCorrection::L => EcLevel::L,
        ErrorCorrection::M => EcLevel::M,
        ErrorCorrection::Q => EcLevel::Q,
        ErrorCorrection::H => EcLevel::H,
    };
    let code = QrCode::with_error_correction_level(value.as_bytes(), level)
        .map_err(|e| SymbologyError::Qr(e.to_string()))?;
    Ok(QrMatrix {
        width: code.width(),
        modules: code.to_colors().into_iter().map(|c| c == Color::Dark).collect(),
    })
}

/// Encode `value` as a row of modules for `format`
pub fn encode_barcode(format: BarcodeFormat, value: &str) -> Result<Vec<bool>, SymbologyError> {
    match format {
        BarcodeFormat::Code128 => encode_code128(value),
        BarcodeFormat::Code39 => encode_code39(value),
        BarcodeFormat::Ean13 => encode_ean13(&ean13_digits(value)?),
        BarcodeFormat::UpcA => {
            let mut digits = vec![0u8];
            digits.extend(upca_digits(value)?);
            encode_ean13(&digits)
        }
    }
}

/// Payload check without building modules
pub fn validate_payload(format: BarcodeFormat, value: &str) -> Result<(), SymbologyError> {
    match format {
        BarcodeFormat::Code128 => code128_values(value).map(|_| ()),
        BarcodeFormat::Code39 => code39_check(value),
        BarcodeFormat::Ean13 => ean13_digits(value).map(|_| ()),
        BarcodeFormat::UpcA => upca_digits(value).map(|_| ()),
    }
}

/// Human-readable line printed under the bars
pub fn human_readable(format: BarcodeFormat, value: &str) -> String {
    match format {
        BarcodeFormat::Ean13 => ean13_digits(value)
            .map(digits_to_string)
            .unwrap_or_else(|_| value.to_string()),
        BarcodeFormat::UpcA => upca_digits(value)
            .map(digits_to_string)
            .unwrap_or_else(|_| value.to_string()),
        _ => value.to_string(),
    }
}

fn digits_to_string(digits: Vec<u8>) -> String {
    digits.iter().map(|d| char::from(b'0' + d)).collect()
}

fn push_widths(out: &mut Vec<bool>, widths: &[u8], first_dark: bool) {
    let mut dark = first_dark;
    for &w in widths {
        out.extend(std::iter::repeat(dark).take(w as usize));
        dark = !dark;
    }
}

// --- Code 128 (set B) ---

const CODE128_PATTERNS: [&str; 106] = [
    "212222", "222122", "222221", "121223", "121322", "131222", "122213", "122312", "132212", "221213",
    "221312", "231212", "112232", "122132", "122231", "113222", "123122", "123221", "223211", "221132",
    "221231", "213212", "223112", "312131", "311222", "321122", "321221", "312212", "322112", "322211",
    "212123", "212321", "232121", "111323", "131123", "131321", "112313", "132113", "132311", "211313",
    "231113", "231311", "112133", "112331", "132131", "113123", "113321", "133121", "313121", "211331",
    "231131", "213113", "213311", "213131", "311123", "311321", "331121", "312113", "312311", "332111",
    "314111", "221411", "431111", "111224", "111422", "121124", "121421", "141122", "141221", "112214",
    "112412", "122114", "122411", "142112", "142211", "241211", "221114", "413111", "241112", "134111",
    "111242", "121142", "121241", "114212", "124112", "124211", "411212", "421112", "421211", "212141",
    "214121", "412121", "111143", "111341", "131141", "114113", "114311", "411113", "411311", "113141",
    "114131", "311141", "411131", "211412", "211214", "211232",
];
const CODE128_START_B: usize = 104;
const CODE128_STOP: &str = "2331112";

fn code128_values(value: &str) -> Result<Vec<usize>, SymbologyError> {
    if value.is_empty() {
        return Err(SymbologyError::Empty);
    }
    let len = value.chars().count();
    if len > CODE128_MAX_LEN {
        return Err(SymbologyError::TooLong { format: "CODE128", len, max: CODE128_MAX_LEN });
    }
    value
        .chars()
        .map(|ch| match ch {
            ' '..='~' => Ok(ch as usize - 32),
            _ => Err(SymbologyError::UnsupportedChar { format: "CODE128", ch }),
        })
        .collect()
}

pub fn code128_checksum(values: &[usize]) -> usize {
    let weighted: usize = values.iter().enumerate().map(|(i, v)| (i + 1) * v).sum();
    (CODE128_START_B + weighted) % 103
}

fn widths(pattern: &str) -> Vec<u8> {
    pattern.bytes().map(|b| b - b'0').collect()
}

fn encode_code128(value: &str) -> Result<Vec<bool>, SymbologyError> {
    let values = code128_values(value)?;
    let checksum = code128_checksum(&values);

    let mut out = vec![];
    let symbols = std::iter::once(CODE128_START_B)
        .chain(values.iter().copied())
        .chain(std::iter::once(checksum));
    for symbol in symbols {
        push_widths(&mut out, &widths(CODE128_PATTERNS[symbol]), true);
    }
    push_widths(&mut out, &widths(CODE128_STOP), true);
    Ok(out)
}

// --- Code 39 ---

/// (char, 9 elements bar/space alternating, w = wide)
const CODE39_TABLE: [(char, &str); 44] = [
    ('0', "nnnwwnwnn"), ('1', "wnnwnnnnw"), ('2', "nnwwnnnnw"), ('3', "wnwwnnnnn"),
    ('4', "nnnwwnnnw"), ('5', "wnnwwnnnn"), ('6', "nnwwwnnnn"), ('7', "nnnwnnwnw"),
    ('8', "wnnwnnwnn"), ('9', "nnwwnnwnn"), ('A', "wnnnnwnnw"), ('B', "nnwnnwnnw"),
    ('C', "wnwnnwnnn"), ('D', "nnnnwwnnw"), ('E', "wnnnwwnnn"), ('F', "nnwnwwnnn"),
    ('G', "nnnnnwwnw"), ('H', "wnnnnwwnn"), ('I', "nnwnnwwnn"), ('J', "nnnnwwwnn"),
    ('K', "wnnnnnnww"), ('L', "nnwnnnnww"), ('M', "wnwnnnnwn"), ('N', "nnnnwnnww"),
    ('O', "wnnnwnnwn"), ('P', "nnwnwnnwn"), ('Q', "nnnnnnwww"), ('R', "wnnnnnwwn"),
    ('S', "nnwnnnwwn"), ('T', "nnnnwnwwn"), ('U', "wwnnnnnnw"), ('V', "nwwnnnnnw"),
    ('W', "wwwnnnnnn"), ('X', "nwnnwnnnw"), ('Y', "wwnnwnnnn"), ('Z', "nwwnwnnnn"),
    ('-', "nwnnnnwnw"), ('.', "wwnnnnwnn"), (' ', "nwwnnnwnn"), ('*', "nwnnwnwnn"),
    ('$', "nwnwnwnnn"), ('/', "nwnwnnnwn"), ('+', "nwnnnwnwn"), ('%', "nnnwnwnwn"),
];
const CODE39_WIDE: u8 = 3;

fn code39_pattern(ch: char) -> Option<&'static str> {
    CODE39_TABLE.iter().find(|(c, _)| *c == ch).map(|(_, p)| *p)
}

fn code39_check(value: &str) -> Result<(), SymbologyError> {
    if value.is_empty() {
        return Err(SymbologyError::Empty);
    }
    match value.chars().find(|&ch| ch == '*' || code39_pattern(ch).is_none()) {
        Some(ch) => Err(SymbologyError::UnsupportedChar { format: "CODE39", ch }),
        None => Ok(()),
    }
}

fn encode_code39(value: &str) -> Result<Vec<bool>, SymbologyError> {
    code39_check(value)?;
    let framed = format!("*{}*", value);
    let mut out = vec![];
    for (i, ch) in framed.chars().enumerate() {
        if i > 0 {
            out.push(false);
        }
        let pattern = code39_pattern(ch)
            .ok_or(SymbologyError::UnsupportedChar { format: "CODE39", ch })?;
        let w: Vec<u8> = pattern.bytes().map(|b| if b == b'w' { CODE39_WIDE } else { 1 }).collect();
        push_widths(&mut out, &w, true);
    }
    Ok(out)
}

// --- EAN-13 / UPC-A ---

const EAN_L: [&str; 10] = [
    "0001101", "0011001", "0010011", "0111101", "0100011",
    "0110001", "0101111", "0111011", "0110111", "0001011",
];
/// Parity of the left half, selected by the leading digit (L or G per position)
const EAN_PARITY: [&str; 10] = [
    "LLLLLL", "LLGLGG", "LLGGLG", "LLGGGL", "LGLLGG",
    "LGGLLG", "LGGGLL", "LGLGLG", "LGLGGL", "LGGLGL",
];

fn parse_digits(value: &str) -> Option<Vec<u8>> {
    value.bytes().map(|b| b.is_ascii_digit().then(|| b - b'0')).collect()
}

/// Mod-10 check digit; weight 3 on the rightmost data digit, alternating
pub fn ean_check_digit(data: &[u8]) -> u8 {
    let sum: u32 = data
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| d as u32 * if i % 2 == 0 { 3 } else { 1 })
        .sum();
    ((10 - sum % 10) % 10) as u8
}

fn with_check_digit(
    format: &'static str,
    value: &str,
    data_len: usize,
    expected: &'static str,
) -> Result<Vec<u8>, SymbologyError> {
    let digits = parse_digits(value)
        .filter(|d| d.len() == data_len || d.len() == data_len + 1)
        .ok_or_else(|| SymbologyError::DigitCount { format, expected, value: value.to_string() })?;
    let check = ean_check_digit(&digits[..data_len]);
    match digits.get(data_len) {
        Some(&actual) if actual != check => {
            Err(SymbologyError::CheckDigit { format, expected: check, actual })
        }
        Some(_) => Ok(digits),
        None => {
            let mut full = digits;
            full.push(check);
            Ok(full)
        }
    }
}

fn ean13_digits(value: &str) -> Result<Vec<u8>, SymbologyError> {
    with_check_digit("EAN13", value, 12, "12 or 13")
}

fn upca_digits(value: &str) -> Result<Vec<u8>, SymbologyError> {
    with_check_digit("UPC_A", value, 11, "11 or 12")
}

fn bits(pattern: &str) -> impl Iterator<Item = bool> + '_ {
    pattern.bytes().map(|b| b == b'1')
}

fn encode_ean13(digits: &[u8]) -> Result<Vec<bool>, SymbologyError> {
    if digits.len() != 13 {
        return Err(SymbologyError::DigitCount {
            format: "EAN13",
            expected: "13",
            value: digits_to_string(digits.to_vec()),
        });
    }
    let parity = EAN_PARITY[digits[0] as usize].as_bytes();
    let mut out = vec![];
    out.extend(bits("101"));
    for (i, &d) in digits[1..7].iter().enumerate() {
        let l = bits(EAN_L[d as usize]);
        if parity[i] == b'G' {
            // G = reversed complement of L
            let mut g: Vec<bool> = l.map(|b| !b).collect();
            g.reverse();
            out.extend(g);
        } else {
            out.extend(l);
        }
    }
    out.extend(bits("01010"));
    for &d in &digits[7..13] {
        out.extend(bits(EAN_L[d as usize]).map(|b| !b));
    }
    out.extend(bits("101"));
    Ok(out)
}
