use crate::models::{DetectionCandidate, RegionOfInterest};

/// Map a detector box from resized-image space back onto the source image.
///
/// X and Y are scaled independently, each coordinate is clamped into the
/// source bounds and then rounded to the nearest pixel. An inverted or
/// collapsed box yields a zero width/height region anchored at its first
/// corner; that is returned as-is.
pub fn map_to_source(
    candidate: &DetectionCandidate,
    resized: (u32, u32),
    source: (u32, u32),
) -> RegionOfInterest {
    let (resized_w, resized_h) = resized;
    let (source_w, source_h) = source;

    let scale_x = source_w as f32 / resized_w.max(1) as f32;
    let scale_y = source_h as f32 / resized_h.max(1) as f32;

    let x1 = to_pixel(candidate.x1 * scale_x, source_w);
    let y1 = to_pixel(candidate.y1 * scale_y, source_h);
    let x2 = to_pixel(candidate.x2 * scale_x, source_w);
    let y2 = to_pixel(candidate.y2 * scale_y, source_h);

    RegionOfInterest {
        x: x1,
        y: y1,
        width: x2.saturating_sub(x1),
        height: y2.saturating_sub(y1),
    }
}

fn to_pixel(value: f32, limit: u32) -> u32 {
    // NaN clamps to 0
    let clamped = if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, limit as f32)
    };
    (clamped.round() as u32).min(limit)
}
