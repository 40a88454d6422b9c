//! Display wrapper that masks the interior of sensitive strings for logs.

use std::fmt;

pub const MASK: &str = "***";

/// Shows the first and last two characters of a value with [`MASK`] between
/// them. Short values still get the mask, so `"ab"` renders as `"ab***ab"`;
/// an empty value renders as nothing.
#[derive(Clone, Copy)]
pub struct Redacted<'a> {
    value: &'a str,
    keep_left: usize,
    keep_right: usize,
}

impl<'a> Redacted<'a> {
    pub fn new(value: &'a str) -> Self {
        Self {
            value,
            keep_left: 2,
            keep_right: 2,
        }
    }

    pub fn keep(mut self, left: usize, right: usize) -> Self {
        self.keep_left = left;
        self.keep_right = right;
        self
    }
}

impl fmt::Display for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.is_empty() {
            return Ok(());
        }
        let count = self.value.chars().count();
        let head: String = self.value.chars().take(self.keep_left).collect();
        let tail: String = self.value.chars().skip(count.saturating_sub(self.keep_right)).collect();
        write!(f, "{head}{MASK}{tail}")
    }
}

impl fmt::Debug for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::Redacted;

    #[test]
    fn masks_the_middle() {
        assert_eq!(Redacted::new("hunter-secret-key").to_string(), "hu***ey");
        assert_eq!(Redacted::new("abc").to_string(), "ab***bc");
        assert_eq!(Redacted::new("x").to_string(), "x***x");
        assert_eq!(Redacted::new("").to_string(), "");
    }

    #[test]
    fn respects_char_boundaries_and_custom_widths() {
        assert_eq!(Redacted::new("ééééé").to_string(), "éé***éé");
        assert_eq!(Redacted::new("secret-value").keep(1, 0).to_string(), "s***");
        assert_eq!(format!("{:?}", Redacted::new("token")), "\"to***en\"");
    }
}
