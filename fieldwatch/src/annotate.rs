//! Frame overlay and JPEG encoding.
//!
//! Everything here draws straight into the `RgbImage` with a 5x7 bitmap font,
//! so annotation has no font files or native drawing library behind it.

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage};

use crate::catalog::CameraSource;
use crate::detection::Detection;
use crate::error::{PipelineError, Result};
use crate::frame::AnalysisMarker;

const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
const BOX_THICKNESS: i32 = 2;
const TEXT_SCALE: i32 = 2;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

/// Overlay color for a detection class.
pub fn class_color(label: &str) -> Rgb<u8> {
    match label {
        "person" => Rgb([255, 0, 0]),
        "cow" | "sheep" | "horse" | "goat" | "pig" => Rgb([0, 255, 0]),
        "car" | "truck" | "bicycle" => Rgb([0, 0, 255]),
        _ => Rgb([255, 255, 0]),
    }
}

fn glyph(ch: char) -> [u8; 7] {
    match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        ':' => [0b00000, 0b01100, 0b01100, 0b00000, 0b01100, 0b01100, 0b00000],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100],
        '-' => [0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000],
        '_' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b11111],
        '%' => [0b11000, 0b11001, 0b00010, 0b00100, 0b01000, 0b10011, 0b00011],
        ' ' => [0; 7],
        _ => [0b11111, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11111],
    }
}

fn put(img: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn fill_rect(img: &mut RgbImage, x: i32, y: i32, width: i32, height: i32, color: Rgb<u8>) {
    let (x0, x1) = (x.max(0), x.saturating_add(width).min(img.width() as i32));
    let (y0, y1) = (y.max(0), y.saturating_add(height).min(img.height() as i32));
    for py in y0..y1 {
        for px in x0..x1 {
            put(img, px, py, color);
        }
    }
}

/// Size in pixels of `text` rendered at `scale`, including the 1px padding.
pub fn text_size(text: &str, scale: i32) -> (i32, i32) {
    let chars = text.chars().count() as i32;
    (
        chars * (GLYPH_WIDTH + 1) * scale + 2,
        GLYPH_HEIGHT * scale + 2,
    )
}

/// Draws `text` with its top-left corner at (x, y). Lowercase letters are
/// rendered as uppercase; unknown characters as a hollow box.
pub fn draw_text(
    img: &mut RgbImage,
    text: &str,
    x: i32,
    y: i32,
    scale: i32,
    color: Rgb<u8>,
    background: Option<Rgb<u8>>,
) {
    let scale = scale.max(1);
    if let Some(bg) = background {
        let (w, h) = text_size(text, scale);
        fill_rect(img, x, y, w, h, bg);
    }

    for (i, ch) in text.to_uppercase().chars().enumerate() {
        let origin_x = x + 1 + i as i32 * (GLYPH_WIDTH + 1) * scale;
        let origin_y = y + 1;
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if (bits >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                    fill_rect(
                        img,
                        origin_x + col * scale,
                        origin_y + row as i32 * scale,
                        scale,
                        scale,
                        color,
                    );
                }
            }
        }
    }
}

/// Draws a hollow rectangle between (x1, y1) and (x2, y2), growing inwards.
/// Edges beyond the canvas are pulled in to just outside it.
pub fn draw_box(img: &mut RgbImage, x1: i32, y1: i32, x2: i32, y2: i32, color: Rgb<u8>, thickness: i32) {
    let thickness = thickness.clamp(1, 64);
    let (max_x, max_y) = (img.width() as i32 - 1 + thickness, img.height() as i32 - 1 + thickness);
    let (x1, x2) = (x1.min(x2).max(-thickness), x1.max(x2).min(max_x));
    let (y1, y2) = (y1.min(y2).max(-thickness), y1.max(y2).min(max_y));
    for t in 0..thickness {
        let (left, right, top, bottom) = (x1 + t, x2 - t, y1 + t, y2 - t);
        if left > right || top > bottom {
            break;
        }
        for x in left..=right {
            put(img, x, top, color);
            put(img, x, bottom, color);
        }
        for y in top..=bottom {
            put(img, left, y, color);
            put(img, right, y, color);
        }
    }
}

/// Draws the detection boxes, the analysis marker and the camera caption.
pub fn annotate(img: &mut RgbImage, source: &CameraSource, displayed: &[Detection], marker: AnalysisMarker) {
    for detection in displayed {
        let b = &detection.bounding_box;
        let color = class_color(&detection.label);
        let (x1, y1, x2, y2) = (b.x1 as i32, b.y1 as i32, b.x2 as i32, b.y2 as i32);
        draw_box(img, x1, y1, x2, y2, color, BOX_THICKNESS);

        let label = format!("{} {:.2}", detection.label, detection.confidence);
        let (_, h) = text_size(&label, TEXT_SCALE);
        // Put the label above the box, or inside it when the box touches the top edge.
        let label_y = if y1 - h >= 0 { y1 - h } else { y1 + BOX_THICKNESS };
        draw_text(img, &label, x1, label_y, TEXT_SCALE, BLACK, Some(color));
    }

    if let Some(caption) = marker.caption() {
        let color = match marker {
            AnalysisMarker::Detections(_) => Rgb([0, 255, 0]),
            _ => Rgb([255, 0, 0]),
        };
        draw_text(img, &caption, 10, 10, TEXT_SCALE, color, Some(BLACK));
    }

    let camera_caption = format!("Camera {}: {}", source.id + 1, source.name);
    let (_, h) = text_size(&camera_caption, TEXT_SCALE);
    draw_text(
        img,
        &camera_caption,
        10,
        img.height() as i32 - h - 10,
        TEXT_SCALE,
        WHITE,
        Some(BLACK),
    );
}

/// Encodes `img` as a baseline JPEG.
pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(PipelineError::encode("cannot encode an empty frame"));
    }
    let mut buf = Vec::with_capacity((width * height / 4) as usize);
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)).write_image(
        img.as_raw(),
        width,
        height,
        ExtendedColorType::Rgb8,
    )?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoundingBox;

    #[test]
    fn classes_get_group_colors() {
        assert_eq!(class_color("person"), Rgb([255, 0, 0]));
        assert_eq!(class_color("cow"), Rgb([0, 255, 0]));
        assert_eq!(class_color("truck"), Rgb([0, 0, 255]));
        assert_eq!(class_color("motion"), Rgb([255, 255, 0]));
    }

    #[test]
    fn box_outline_is_drawn_and_interior_left_alone() {
        let mut img = RgbImage::new(40, 40);
        draw_box(&mut img, 5, 5, 30, 30, Rgb([9, 9, 9]), 2);
        assert_eq!(*img.get_pixel(5, 5), Rgb([9, 9, 9]));
        assert_eq!(*img.get_pixel(6, 20), Rgb([9, 9, 9]));
        assert_eq!(*img.get_pixel(30, 30), Rgb([9, 9, 9]));
        assert_eq!(*img.get_pixel(15, 15), Rgb([0, 0, 0]));
    }

    #[test]
    fn drawing_off_canvas_is_clipped() {
        let mut img = RgbImage::new(10, 10);
        draw_box(&mut img, -5, -5, 50, 50, WHITE, 1);
        draw_text(&mut img, "cow 0.91", 8, 8, 2, WHITE, Some(BLACK));
    }

    #[test]
    fn huge_box_draws_only_the_visible_edges() {
        let mut img = RgbImage::new(16, 12);
        draw_box(&mut img, 2, 2, i32::MAX, i32::MAX, WHITE, 2);
        assert_eq!(*img.get_pixel(2, 5), WHITE);
        assert_eq!(*img.get_pixel(10, 2), WHITE);
        assert_eq!(*img.get_pixel(15, 11), BLACK);
        fill_rect(&mut img, i32::MAX - 1, 0, i32::MAX, 4, WHITE);
    }

    #[test]
    fn annotate_changes_pixels_and_encodes() {
        let source = CameraSource::new(0, "/videos/barn.mp4");
        let mut img = RgbImage::from_pixel(320, 240, Rgb([40, 40, 40]));
        let before = img.clone();
        let displayed = vec![Detection::new(
            "cow",
            0.8,
            BoundingBox::new(50.0, 60.0, 150.0, 160.0),
        )];
        annotate(&mut img, &source, &displayed, AnalysisMarker::Detections(1));
        assert_ne!(img, before);
        assert_eq!(*img.get_pixel(100, 60), Rgb([0, 255, 0]));

        let jpeg = encode_jpeg(&img, 85).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn empty_frame_cannot_be_encoded() {
        assert!(matches!(
            encode_jpeg(&RgbImage::new(0, 0), 85),
            Err(PipelineError::EncodeFailure(_))
        ));
    }
}
