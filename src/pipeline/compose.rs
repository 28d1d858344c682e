//! Fragment composition helpers.
//!
//! Each notation wraps the raw fragment with its own header and footer (see
//! [`crate::notation::Notation::compose`]). The helpers here are the shared
//! pieces: unit conversion for the page geometry and line-ending cleanup.
//!
//! Composition never touches the raw fragment the caller holds. The cache key
//! and any error display are derived from the original text, not from the
//! decorated document written to disk.

/// Screen resolution assumed when converting pixel widths to physical units.
pub const DPI: f64 = 72.0;

/// Numeric options a composer may need.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComposeOptions {
    /// Maximum width of the final image, in pixels.
    pub image_max_width: u32,
}

impl ComposeOptions {
    pub fn new(image_max_width: u32) -> Self {
        Self { image_max_width }
    }

    /// Width in points. At 72 DPI one pixel is one point.
    pub fn width_points(&self) -> f64 {
        f64::from(self.image_max_width) * 72.0 / DPI
    }

    /// Width in inches.
    pub fn width_inches(&self) -> f64 {
        f64::from(self.image_max_width) / DPI
    }
}

/// Convert CRLF and lone CR line endings to LF.
pub fn normalize_linebreaks(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

/// Drop every carriage return.
pub fn strip_carriage_returns(input: &str) -> String {
    input.replace('\r', "")
}

/// Format a dimension without a trailing `.0` for whole numbers.
pub fn format_dimension(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        let s = format!("{:.4}", value);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_conversions() {
        let opts = ComposeOptions::new(360);
        assert_eq!(opts.width_points(), 360.0);
        assert_eq!(opts.width_inches(), 5.0);
    }

    #[test]
    fn linebreaks_normalised() {
        assert_eq!(normalize_linebreaks("a\r\nb\rc\n"), "a\nb\nc\n");
        assert_eq!(strip_carriage_returns("a\r\nb\r"), "a\nb");
    }

    #[test]
    fn dimensions_formatted() {
        assert_eq!(format_dimension(5.0), "5");
        assert_eq!(format_dimension(5.5), "5.5");
        assert_eq!(format_dimension(400.0 / 72.0), "5.5556");
    }
}
