/// Clamps `value` into `[min, max]`; non-finite values fall back to `fallback`.
/// Negative zero comes back as `0.0`.
pub fn clamp_f64(value: Option<f64>, min: f64, max: f64, fallback: f64) -> f64 {
    let clamped = match value {
        Some(value) if value.is_finite() => value.clamp(min, max),
        _ => fallback.clamp(min, max),
    };
    clamped + 0.0
}

/// Applies the default when absent and caps at `ceiling`; zero is treated as absent.
pub fn capped_u32(value: Option<u32>, default: u32, ceiling: u32) -> u32 {
    let ceiling = ceiling.max(1);
    value
        .filter(|value| *value > 0)
        .unwrap_or(default)
        .clamp(1, ceiling)
}

/// Cuts `text` to at most `max_chars` characters, reporting whether anything was dropped.
pub fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (text[..byte_idx].to_string(), true),
        None => (text.to_string(), false),
    }
}
