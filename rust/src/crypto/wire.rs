//! JSON text exactly as existing peers produce it.
//!
//! Signatures cover serialized bytes, so signer and verifier must agree on
//! every separator and escape. Peers emit keys in insertion order, separate
//! items with `", "` and keys from values with `": "`, and escape everything
//! outside printable ASCII as lowercase `\uXXXX` (UTF-16 surrogate pairs above
//! the BMP). Insertion order survives parsing because `serde_json` is built
//! with `preserve_order`.
//!
//! Numbers keep the text they arrived with (`arbitrary_precision`), so an
//! integer past `u64::MAX` or a float written `1e-07` re-serializes exactly.
//! Exponents are written with an explicit sign and at least two digits, which
//! is how peers print floats; locally produced floats are brought into that
//! form and received ones already are.

use std::borrow::Cow;
use std::io::{self, Write};

use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};
use serde_json::Number;

/// `serde_json` formatter that reproduces the peer format described above.
#[derive(Debug, Default, Clone, Copy)]
pub struct PeerFormatter;

impl Formatter for PeerFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        let mut start = 0;
        for (index, ch) in fragment.char_indices() {
            // DEL is ASCII but peers escape it along with everything non-printable.
            if ch.is_ascii() && ch != '\x7f' {
                continue;
            }
            writer.write_all(fragment[start..index].as_bytes())?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = index + ch.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }

    fn write_number_str<W>(&mut self, writer: &mut W, value: &str) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        writer.write_all(peer_exponent(value).as_bytes())
    }

    fn write_f64<W>(&mut self, writer: &mut W, value: f64) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        match Number::from_f64(value) {
            Some(number) => self.write_number_str(writer, &number.to_string()),
            None => writer.write_all(b"null"),
        }
    }
}

/// Rewrites `1e16` as `1e+16` and `1E-7` as `1e-07`. Numbers without an
/// exponent, and exponents already in that form, pass through untouched.
fn peer_exponent(number: &str) -> Cow<'_, str> {
    let Some(split) = number.find(['e', 'E']) else {
        return Cow::Borrowed(number);
    };
    let (mantissa, exponent) = (&number[..split], &number[split + 1..]);
    let (sign, digits) = match exponent.as_bytes().first() {
        Some(b'-') => ('-', &exponent[1..]),
        Some(b'+') => ('+', &exponent[1..]),
        _ => ('+', exponent),
    };
    let digits = digits.trim_start_matches('0');
    let formatted = format!("{mantissa}e{sign}{digits:0>2}");
    if formatted == number {
        Cow::Borrowed(number)
    } else {
        Cow::Owned(formatted)
    }
}

/// Serializes `value` in the peer format. The output is pure ASCII.
pub fn to_wire_bytes<T>(value: &T) -> Result<Vec<u8>, serde_json::Error>
where
    T: ?Sized + Serialize,
{
    let mut out = Vec::with_capacity(128);
    let mut serializer = Serializer::with_formatter(&mut out, PeerFormatter);
    value.serialize(&mut serializer)?;
    Ok(out)
}
