use std::num::ParseIntError;

/// Parse a decimal or `0x` prefixed hexadecimal number.
pub fn parse_u32(s: &str) -> Result<u32, ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

pub fn generate_hex(buf: &[u8]) -> String {
    let mut result = String::new();
    for b in buf {
        result.push_str(&format!("{b:02X}"));
    }
    result
}
