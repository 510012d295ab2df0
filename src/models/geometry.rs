use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl ScreenSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: i32,
    pub y: i32,
}

/// Axis-aligned rectangle given by its top-left corner and extent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Scales position and extent, each axis by its own factor.
    pub fn scaled(&self, scale: Scale) -> Self {
        Self {
            x: self.x * scale.x,
            y: self.y * scale.y,
            width: self.width * scale.x,
            height: self.height * scale.y,
        }
    }
}

/// Independent horizontal and vertical scale factors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub x: f64,
    pub y: f64,
}

impl Scale {
    pub const IDENTITY: Scale = Scale { x: 1.0, y: 1.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Live screen dimensions paired with the dimensions of a screenshot of it.
///
/// Built fresh for every conversion since either side may change between
/// calls (display resize, a different capture scale).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenGeometry {
    pub screen: ScreenSize,
    pub screenshot: ScreenSize,
}

impl ScreenGeometry {
    pub fn new(screen: ScreenSize, screenshot: ScreenSize) -> Self {
        Self { screen, screenshot }
    }

    /// Factors taking screen space to screenshot space.
    pub fn to_screenshot_scale(&self) -> Scale {
        Scale::new(
            ratio(self.screenshot.width, self.screen.width),
            ratio(self.screenshot.height, self.screen.height),
        )
    }

    /// Factors taking screenshot space to screen space.
    pub fn to_screen_scale(&self) -> Scale {
        Scale::new(
            ratio(self.screen.width, self.screenshot.width),
            ratio(self.screen.height, self.screenshot.height),
        )
    }

    pub fn to_screen(&self, x: f64, y: f64) -> (f64, f64) {
        let scale = self.to_screen_scale();
        (x * scale.x, y * scale.y)
    }

    pub fn to_screenshot(&self, x: f64, y: f64) -> (f64, f64) {
        let scale = self.to_screenshot_scale();
        (x * scale.x, y * scale.y)
    }
}

// a zero-sized side leaves coordinates untouched rather than producing inf/NaN
fn ratio(num: u32, den: u32) -> f64 {
    if den == 0 {
        1.0
    } else {
        f64::from(num) / f64::from(den)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        let scale = a.abs().max(b.abs()).max(1.0);
        (a - b).abs() / scale <= 1e-6
    }

    #[test]
    fn axes_scale_independently() {
        let geometry = ScreenGeometry::new(ScreenSize::new(1000, 500), ScreenSize::new(500, 1000));
        assert_eq!(geometry.to_screen(250.0, 250.0), (500.0, 125.0));
        assert_eq!(geometry.to_screenshot(500.0, 125.0), (250.0, 250.0));
    }

    #[test]
    fn conversions_round_trip() {
        let sizes = [
            (ScreenSize::new(1920, 1080), ScreenSize::new(3840, 2160)),
            (ScreenSize::new(1512, 982), ScreenSize::new(1024, 768)),
            (ScreenSize::new(1000, 500), ScreenSize::new(500, 1000)),
            (ScreenSize::new(7, 3), ScreenSize::new(1999, 11)),
        ];
        for (screen, shot) in sizes {
            let geometry = ScreenGeometry::new(screen, shot);
            for (x, y) in [(0.0, 0.0), (1.0, 1.0), (123.5, 77.25), (f64::from(screen.width), f64::from(screen.height))] {
                let (sx, sy) = geometry.to_screenshot(x, y);
                let (bx, by) = geometry.to_screen(sx, sy);
                assert!(close(bx, x) && close(by, y), "{screen:?}/{shot:?}: ({x},{y}) -> ({bx},{by})");

                let (cx, cy) = geometry.to_screen(x, y);
                let (dx, dy) = geometry.to_screenshot(cx, cy);
                assert!(close(dx, x) && close(dy, y));
            }
        }
    }

    #[test]
    fn rect_scales_per_axis() {
        let rect = Rect::new(10.0, 10.0, 20.0, 20.0).scaled(Scale::new(2.0, 2.0));
        assert_eq!(rect, Rect::new(20.0, 20.0, 40.0, 40.0));

        let rect = Rect::new(10.0, 10.0, 20.0, 20.0).scaled(Scale::new(0.5, 3.0));
        assert_eq!(rect, Rect::new(5.0, 30.0, 10.0, 60.0));
    }

    #[test]
    fn zero_sized_screen_is_identity() {
        let geometry = ScreenGeometry::new(ScreenSize::new(0, 0), ScreenSize::new(100, 100));
        assert_eq!(geometry.to_screenshot_scale(), Scale::IDENTITY);
    }
}
