//! Frame-pixel to screen-pixel conversions.
//!
//! All results stay in `f64`; rounding happens only where a value leaves the engine
//! ([`to_pixel`]), so chained conversions do not accumulate error.

use crate::error::MappingError;
use crate::types::{DisplayInfo, Point, Rect, Size};

/// Physical bounds of the display, measured if the platform reported them, derived otherwise.
///
/// The derived origin uses the primary monitor's scale because the virtual desktop is laid out in
/// that space; the extent uses the display's own scale.
pub fn physical_bounds(display: &DisplayInfo) -> Rect {
    if let Some(measured) = display.physical_bounds {
        return measured;
    }
    let origin_scale = display.origin_scale();
    let scale = display.scale();
    Rect::new(
        display.bounds.x * origin_scale,
        display.bounds.y * origin_scale,
        display.bounds.width * scale,
        display.bounds.height * scale,
    )
}

fn check_positive(label: &str, width: f64, height: f64) -> Result<(), MappingError> {
    let valid = width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0;
    if valid {
        Ok(())
    } else {
        Err(MappingError::InvalidInput(format!(
            "{label} must be positive, got {width}x{height}"
        )))
    }
}

/// Maps a point in captured-frame pixels to absolute physical screen pixels.
pub fn map_image_point_to_physical(
    point: Point,
    image: Size,
    display: &DisplayInfo,
) -> Result<Point, MappingError> {
    check_positive("image size", image.width, image.height)?;
    check_positive("display bounds", display.bounds.width, display.bounds.height)?;
    if !point.is_finite() {
        return Err(MappingError::InvalidInput(format!(
            "point ({}, {}) is not finite",
            point.x, point.y
        )));
    }

    let physical = physical_bounds(display);
    Ok(Point::new(
        physical.x + (point.x / image.width) * physical.width,
        physical.y + (point.y / image.height) * physical.height,
    ))
}

/// Inverse used for presentation: absolute physical pixels to logical desktop coordinates.
pub fn physical_to_logical(absolute: Point, display: &DisplayInfo) -> Point {
    let physical = physical_bounds(display);
    let scale = display.scale();
    Point::new(
        (absolute.x - physical.x) / scale + display.bounds.x,
        (absolute.y - physical.y) / scale + display.bounds.y,
    )
}

/// Logical desktop coordinates relative to the display's own top-left corner (overlay space).
pub fn logical_to_local(logical: Point, display: &DisplayInfo) -> Point {
    Point::new(logical.x - display.bounds.x, logical.y - display.bounds.y)
}

pub fn to_pixel(value: f64) -> i32 {
    value.round() as i32
}
