//! Pure calculation functions for watermark geometry.
//!
//! All functions here are pure and testable without any I/O or images.

use super::watermark::Anchor;

/// Calculate the watermark's scaled dimensions.
///
/// The target is `floor(min(base_w, base_h) * scale)`. The watermark's longer
/// side is set to the target and the other side follows its aspect ratio,
/// truncated. Neither side drops below one pixel.
///
/// # Arguments
/// * `base` - Base image dimensions (width, height)
/// * `mark` - Watermark source dimensions (width, height)
/// * `scale` - Fraction of the base's shorter side
///
/// # Examples
/// ```
/// # use pack_organizer::imaging::calculate_watermark_size;
/// // 1000x800 base, square watermark, scale 0.25 → 200x200
/// assert_eq!(calculate_watermark_size((1000, 800), (50, 50), 0.25), (200, 200));
///
/// // Landscape 2:1 watermark → width takes the target
/// assert_eq!(calculate_watermark_size((1000, 800), (100, 50), 0.25), (200, 100));
/// ```
pub fn calculate_watermark_size(base: (u32, u32), mark: (u32, u32), scale: f64) -> (u32, u32) {
    let (base_w, base_h) = base;
    let (mark_w, mark_h) = mark;

    let target = (base_w.min(base_h) as f64 * scale).floor();
    let ratio = mark_w as f64 / mark_h.max(1) as f64;

    let (w, h) = if ratio >= 1.0 {
        (target, (target / ratio).floor())
    } else {
        ((target * ratio).floor(), target)
    };

    (to_dimension(w), to_dimension(h))
}

fn to_dimension(value: f64) -> u32 {
    if value.is_finite() && value >= 1.0 {
        value.min(u32::MAX as f64) as u32
    } else {
        1
    }
}

/// Calculate the top-left offset of a watermark for the given anchor.
///
/// Edges are inset by the margins; centred axes use floor division, so the
/// result may be negative when the watermark is larger than the base (the
/// overhang is clipped when compositing).
///
/// | Axis | left/top | centre | right/bottom |
/// |---|---|---|---|
/// | x | `margin_x` | `(bw - ww) / 2` | `bw - ww - margin_x` |
/// | y | `margin_y` | `(bh - wh) / 2` | `bh - wh - margin_y` |
pub fn calculate_anchor_offset(
    anchor: Anchor,
    base: (u32, u32),
    mark: (u32, u32),
    margins: (u32, u32),
) -> (i64, i64) {
    let (bw, bh) = (base.0 as i64, base.1 as i64);
    let (ww, wh) = (mark.0 as i64, mark.1 as i64);
    let (mx, my) = (margins.0 as i64, margins.1 as i64);

    let left = mx;
    let center_x = (bw - ww).div_euclid(2);
    let right = bw - ww - mx;
    let top = my;
    let middle_y = (bh - wh).div_euclid(2);
    let bottom = bh - wh - my;

    match anchor {
        Anchor::TopLeft => (left, top),
        Anchor::TopCenter => (center_x, top),
        Anchor::TopRight => (right, top),
        Anchor::CenterLeft => (left, middle_y),
        Anchor::Center => (center_x, middle_y),
        Anchor::CenterRight => (right, middle_y),
        Anchor::BottomLeft => (left, bottom),
        Anchor::BottomCenter => (center_x, bottom),
        Anchor::BottomRight => (right, bottom),
    }
}

/// Scale an alpha value by `opacity`, truncating.
pub fn scale_alpha(alpha: u8, opacity: f64) -> u8 {
    (alpha as f64 * opacity).floor().clamp(0.0, 255.0) as u8
}
