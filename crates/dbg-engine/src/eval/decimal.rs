//! `System.Decimal` encode/decode: a 96-bit integer mantissa plus a 0-28
//! scale and sign packed the way the CLR lays out `decimal`'s four `int`
//! words, with banker's rounding applied once a literal carries more than
//! 29 significant digits (spec §4.4 "decimal parse/format round trip").

use crate::error::DebuggerError;

/// The CLR's four-word decimal representation: `low`/`mid`/`high` form a
/// 96-bit unsigned mantissa; `flags` packs the scale in bits 16-23 and the
/// sign in bit 31.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecimalBits {
    pub low: u32,
    pub mid: u32,
    pub high: u32,
    pub flags: u32,
}

const MAX_SCALE: u32 = 28;
/// `decimal.MaxValue`'s mantissa, used to reject literals with more
/// integer digits than a 96-bit mantissa can hold once rounded.
const MANTISSA_MAX: u128 = 79_228_162_514_264_337_593_543_950_335;

impl DecimalBits {
    pub fn mantissa(&self) -> u128 {
        ((self.high as u128) << 64) | ((self.mid as u128) << 32) | self.low as u128
    }

    pub fn scale(&self) -> u32 {
        (self.flags >> 16) & 0xFF
    }

    pub fn is_negative(&self) -> bool {
        self.flags & 0x8000_0000 != 0
    }

    fn from_parts(mantissa: u128, scale: u32, negative: bool) -> Self {
        Self {
            low: (mantissa & 0xFFFF_FFFF) as u32,
            mid: ((mantissa >> 32) & 0xFFFF_FFFF) as u32,
            high: ((mantissa >> 64) & 0xFFFF_FFFF) as u32,
            flags: (scale << 16) | if negative { 0x8000_0000 } else { 0 },
        }
    }
}

/// Round a decimal digit string (no sign, no point) to at most `keep`
/// digits using round-half-to-even, returning the rounded digit string and
/// whether rounding carried an extra leading digit (`999` → `100` keeping
/// 3 digits is a carry that grew the integer part by one place).
fn round_half_even(digits: &str, keep: usize) -> (String, bool) {
    if digits.len() <= keep {
        return (digits.to_string(), false);
    }
    let (head, tail) = digits.split_at(keep);
    let mut head_digits: Vec<u8> = head.bytes().map(|b| b - b'0').collect();
    let tail_bytes = tail.as_bytes();
    let first_tail = tail_bytes[0] - b'0';
    let rest_nonzero = tail_bytes[1..].iter().any(|&b| b != b'0');

    let round_up = match first_tail.cmp(&5) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => {
            if rest_nonzero {
                true
            } else {
                head_digits.last().map(|d| d % 2 == 1).unwrap_or(false)
            }
        }
    };

    let mut carried = false;
    if round_up {
        let mut i = head_digits.len();
        loop {
            if i == 0 {
                head_digits.insert(0, 1);
                carried = true;
                break;
            }
            i -= 1;
            head_digits[i] += 1;
            if head_digits[i] == 10 {
                head_digits[i] = 0;
                continue;
            }
            break;
        }
    }

    let rendered: String = head_digits.iter().map(|d| (b'0' + d) as char).collect();
    (rendered, carried)
}

/// Parse a decimal literal (`-123.4500`, `0.1`, `79228162514264337593543950335`)
/// into its CLR bit representation.
pub fn parse_decimal(text: &str) -> Result<DecimalBits, DebuggerError> {
    let text = text.trim();
    let (negative, rest) = match text.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return Err(DebuggerError::ParseError(format!("not a decimal literal: {text}")));
    }

    let (int_part, frac_part) = match rest.split_once('.') {
        Some((i, f)) => (i, f),
        None => (rest, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(DebuggerError::ParseError(format!("not a decimal literal: {text}")));
    }

    let mut digits = format!("{int_part}{frac_part}");
    let mut scale = frac_part.len() as u32;

    // Strip leading zeros but keep significance of the scale.
    let leading_zeros = digits.bytes().take_while(|&b| b == b'0').count();
    if leading_zeros == digits.len() {
        digits = "0".to_string();
    } else {
        digits = digits[leading_zeros..].to_string();
    }

    const MAX_SIGNIFICANT_DIGITS: usize = 29;
    if digits.len() > MAX_SIGNIFICANT_DIGITS {
        let excess = digits.len() - MAX_SIGNIFICANT_DIGITS;
        // A carry here (e.g. `999...` -> `100...0`) grows the digit count
        // back by one; that extra place belongs to the integer side, so
        // `scale` is unaffected either way.
        let (rounded, _carried) = round_half_even(&digits, MAX_SIGNIFICANT_DIGITS);
        digits = rounded;
        scale = scale.saturating_sub(excess as u32);
    }
    if scale > MAX_SCALE {
        let excess = scale - MAX_SCALE;
        if digits.len() > excess as usize {
            let keep = digits.len() - excess as usize;
            let (rounded, _carried) = round_half_even(&digits, keep);
            digits = rounded;
        }
        scale = MAX_SCALE;
    }

    let mantissa: u128 = digits
        .parse()
        .map_err(|_| DebuggerError::ParseError(format!("decimal literal out of range: {text}")))?;
    if mantissa > MANTISSA_MAX {
        return Err(DebuggerError::ParseError(format!("decimal literal out of range: {text}")));
    }

    Ok(DecimalBits::from_parts(mantissa, scale, negative && mantissa != 0))
}

/// Render a decimal's bits back to its canonical string form (fixed-point,
/// trailing zeros preserved the way `decimal.ToString()` keeps scale).
pub fn format_decimal(bits: &DecimalBits) -> String {
    let mantissa = bits.mantissa();
    let digits = mantissa.to_string();
    let scale = bits.scale() as usize;
    let sign = if bits.is_negative() { "-" } else { "" };

    if scale == 0 {
        return format!("{sign}{digits}");
    }
    if digits.len() <= scale {
        let padded = format!("{}{}", "0".repeat(scale - digits.len() + 1), digits);
        let split_at = padded.len() - scale;
        format!("{sign}{}.{}", &padded[..split_at], &padded[split_at..])
    } else {
        let split_at = digits.len() - scale;
        format!("{sign}{}.{}", &digits[..split_at], &digits[split_at..])
    }
}
