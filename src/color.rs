use palette::{Hsl, IntoColor, Srgb};

// ---------------------------------------------------------------------------
// Color palette generator
// ---------------------------------------------------------------------------

/// Generates `n` visually distinct colours using evenly spaced hues,
/// as `#rrggbb` strings for the chart.
pub fn generate_palette(n: usize) -> Vec<String> {
    if n == 0 {
        return Vec::new();
    }
    (0..n)
        .map(|i| {
            // Start at a blue so two-series charts read as blue / orange.
            let hue = 210.0 + (i as f32 / n as f32) * 360.0;
            let hsl = Hsl::new(hue, 0.75, 0.45);
            let rgb: Srgb = hsl.into_color();
            to_hex(rgb)
        })
        .collect()
}

fn to_hex(rgb: Srgb) -> String {
    let channel = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    format!(
        "#{:02x}{:02x}{:02x}",
        channel(rgb.red),
        channel(rgb.green),
        channel(rgb.blue)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palette_is_distinct_hex() {
        let colors = generate_palette(2);
        assert_eq!(colors.len(), 2);
        assert_ne!(colors[0], colors[1]);
        assert!(colors.iter().all(|c| c.len() == 7 && c.starts_with('#')));
        assert!(generate_palette(0).is_empty());
    }
}
