use serde::{Deserialize, Serialize};

use crate::sdk::{PixelSize, ScreenPoint};

/// The map container's box in client coordinates, as from
/// `getBoundingClientRect()`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContainerRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// Top-left of the tooltip relative to the container: `offset` pixels right
/// of and below the cursor, then clamped so the tooltip stays inside.
/// Returns 0 on an axis where the tooltip is larger than the container.
pub fn clamp_tooltip(
    anchor: ScreenPoint,
    container: &ContainerRect,
    tooltip: PixelSize,
    offset: f64,
) -> ScreenPoint {
    ScreenPoint::new(
        clamp_axis(anchor.x - container.left + offset, container.width, tooltip.width),
        clamp_axis(anchor.y - container.top + offset, container.height, tooltip.height),
    )
}

fn clamp_axis(position: f64, extent: f64, size: f64) -> f64 {
    let max = (extent - size).max(0.0);
    if position.is_nan() {
        return 0.0;
    }
    position.clamp(0.0, max)
}
