use crate::parse_number;

/// 11-color AQHI palette: one color per index value 1..=10, then "10+"
pub const AQHI_COLORS: [&str; 11] = [
    "#01cbff", "#0099cb", "#016797", "#fffe03", "#ffcb00", "#ff9835", "#fd6866", "#fe0002",
    "#cc0001", "#9a0100", "#640100",
];

/// Color used when a station has no usable AQHI value
pub const MISSING_COLOR: &str = "#9e9e9e";

/// Position in [`AQHI_COLORS`] for a value. Bands have inclusive upper bounds
/// 1, 2, ..., 10; anything above 10 lands in the last band.
pub fn aqhi_band(value: f64) -> Option<usize> {
    if value.is_nan() {
        return None;
    }
    let band = (1..=10)
        .position(|upper| value <= upper as f64)
        .unwrap_or(AQHI_COLORS.len() - 1);
    Some(band)
}

pub fn aqhi_color(value: Option<f64>) -> &'static str {
    value
        .and_then(aqhi_band)
        .map(|band| AQHI_COLORS[band])
        .unwrap_or(MISSING_COLOR)
}

/// Color for a raw textual value, coerced the same way as record fields
pub fn aqhi_color_from_text(text: &str) -> &'static str {
    aqhi_color(parse_number(text))
}
