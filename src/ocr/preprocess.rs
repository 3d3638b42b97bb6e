use image::{GrayImage, Luma, RgbaImage};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};

/// White margin added around a crop before OCR; Tesseract misses glyphs
/// touching the image edge.
pub const OCR_PADDING: u32 = 8;

/// Converts image to binary by keeping only bright pixels.
///
/// Pixels where R > threshold AND G > threshold AND B > threshold become black (text).
/// All other pixels become white (background).
pub fn threshold_bright_pixels(img: &RgbaImage, threshold: u8) -> GrayImage {
    let (width, height) = img.dimensions();
    let mut output = GrayImage::new(width, height);

    for (x, y, pixel) in img.enumerate_pixels() {
        let value = if pixel[0] > threshold && pixel[1] > threshold && pixel[2] > threshold {
            0u8 // Black (text)
        } else {
            255u8 // White (background)
        };
        output.put_pixel(x, y, Luma([value]));
    }

    output
}

/// Binarizes with an Otsu threshold into black text on white.
///
/// The minority class is taken as text, so both light-on-dark and
/// dark-on-light rows come out the same way.
pub fn binarize_otsu(img: &RgbaImage) -> GrayImage {
    let gray = image::imageops::grayscale(img);
    let level = otsu_level(&gray);
    let bright = gray.pixels().filter(|p| p[0] > level).count();

    if bright * 2 > (gray.width() * gray.height()) as usize {
        // Light background: dark text stays black
        threshold(&gray, level, ThresholdType::Binary)
    } else {
        threshold(&gray, level, ThresholdType::BinaryInverted)
    }
}

/// Adds a white border of `pad` pixels on every side.
pub fn pad_border(img: &GrayImage, pad: u32) -> GrayImage {
    let (width, height) = img.dimensions();
    let mut output = GrayImage::from_pixel(width + 2 * pad, height + 2 * pad, Luma([255]));
    image::imageops::replace(&mut output, img, pad as i64, pad as i64);
    output
}

/// Full preparation of a crop for recognition: binarize, then pad.
pub fn prepare_for_ocr(img: &RgbaImage, threshold: Option<u8>) -> GrayImage {
    let binary = match threshold {
        Some(level) => threshold_bright_pixels(img, level),
        None => binarize_otsu(img),
    };
    pad_border(&binary, OCR_PADDING)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_threshold_bright_pixels() {
        let mut img = RgbaImage::new(3, 1);

        // Pixel 0: Dark (should become white)
        img.put_pixel(0, 0, Rgba([100, 100, 100, 255]));
        // Pixel 1: Bright white (should become black)
        img.put_pixel(1, 0, Rgba([250, 250, 250, 255]));
        // Pixel 2: One channel dark (should become white)
        img.put_pixel(2, 0, Rgba([250, 250, 100, 255]));

        let result = threshold_bright_pixels(&img, 190);

        assert_eq!(result.get_pixel(0, 0)[0], 255, "Dark pixel should become white");
        assert_eq!(result.get_pixel(1, 0)[0], 0, "Bright pixel should become black");
        assert_eq!(result.get_pixel(2, 0)[0], 255, "Partially dark pixel should become white");
    }

    /// 10x10 image with a 2x10 stripe of `fg` on `bg`.
    fn stripe(fg: u8, bg: u8) -> RgbaImage {
        RgbaImage::from_fn(10, 10, |x, _| {
            let v = if x < 2 { fg } else { bg };
            Rgba([v, v, v, 255])
        })
    }

    #[test]
    fn test_otsu_makes_text_black_for_both_polarities() {
        let light_text = binarize_otsu(&stripe(230, 30));
        assert_eq!(light_text.get_pixel(0, 0)[0], 0);
        assert_eq!(light_text.get_pixel(5, 5)[0], 255);

        let dark_text = binarize_otsu(&stripe(20, 220));
        assert_eq!(dark_text.get_pixel(0, 0)[0], 0);
        assert_eq!(dark_text.get_pixel(5, 5)[0], 255);
    }

    #[test]
    fn test_pad_border() {
        let img = GrayImage::from_pixel(4, 2, Luma([0]));
        let padded = pad_border(&img, 3);
        assert_eq!(padded.dimensions(), (10, 8));
        assert_eq!(padded.get_pixel(0, 0)[0], 255);
        assert_eq!(padded.get_pixel(3, 3)[0], 0);
        assert_eq!(padded.get_pixel(6, 4)[0], 0);
        assert_eq!(padded.get_pixel(7, 4)[0], 255);
    }
}
