use image::imageops::FilterType;

/// Image resize calculations
pub struct ImageResize;

impl ImageResize {
    /// Largest size that fits inside `max_width`×`max_height` with the original
    /// aspect ratio. Never upscales.
    pub fn fit_within(
        orig_width: u32,
        orig_height: u32,
        max_width: u32,
        max_height: u32,
    ) -> (u32, u32) {
        if orig_width == 0 || orig_height == 0 {
            return (orig_width, orig_height);
        }
        if orig_width <= max_width && orig_height <= max_height {
            return (orig_width, orig_height);
        }

        let scale_width = max_width as f64 / orig_width as f64;
        let scale_height = max_height as f64 / orig_height as f64;
        let scale = scale_width.min(scale_height);

        let width = ((orig_width as f64 * scale).round() as u32).clamp(1, max_width);
        let height = ((orig_height as f64 * scale).round() as u32).clamp(1, max_height);
        (width, height)
    }

    /// Select appropriate filter type based on resize ratio
    pub fn select_filter(
        orig_width: u32,
        orig_height: u32,
        new_width: u32,
        new_height: u32,
    ) -> FilterType {
        let width_ratio = orig_width as f32 / new_width.max(1) as f32;
        let height_ratio = orig_height as f32 / new_height.max(1) as f32;
        let max_ratio = width_ratio.max(height_ratio);

        if max_ratio > 2.0 {
            FilterType::Triangle
        } else if max_ratio > 1.5 {
            FilterType::CatmullRom
        } else {
            FilterType::Lanczos3
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_landscape() {
        assert_eq!(ImageResize::fit_within(800, 600, 300, 300), (300, 225));
    }

    #[test]
    fn test_fit_portrait() {
        assert_eq!(ImageResize::fit_within(600, 800, 300, 300), (225, 300));
    }

    #[test]
    fn test_fit_never_upscales() {
        assert_eq!(ImageResize::fit_within(120, 80, 300, 300), (120, 80));
        assert_eq!(ImageResize::fit_within(300, 300, 300, 300), (300, 300));
    }

    #[test]
    fn test_fit_extreme_aspect_keeps_one_pixel() {
        assert_eq!(ImageResize::fit_within(10_000, 5, 300, 300), (300, 1));
    }

    #[test]
    fn test_fit_non_square_box() {
        assert_eq!(ImageResize::fit_within(1000, 1000, 400, 200), (200, 200));
    }

    #[test]
    fn test_select_filter() {
        assert_eq!(ImageResize::select_filter(1000, 1000, 100, 100), FilterType::Triangle);
        assert_eq!(ImageResize::select_filter(1000, 1000, 600, 600), FilterType::CatmullRom);
        assert_eq!(ImageResize::select_filter(1000, 1000, 900, 900), FilterType::Lanczos3);
    }
}
