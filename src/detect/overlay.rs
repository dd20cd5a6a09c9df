//! Box and caption burn-in

use image::{Rgb, RgbImage};

use super::result::Detection;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: i64 = 2;

// 3x5 glyphs drawn at 2x
const GLYPH_W: i64 = 3;
const GLYPH_H: i64 = 5;
const SCALE: i64 = 2;
const ADVANCE: i64 = (GLYPH_W + 1) * SCALE;
const TEXT_H: i64 = GLYPH_H * SCALE;
const TAB_PAD: i64 = 3;

/// Draw a detection's box and caption tab into `image`. Anything outside the
/// image is clipped.
pub fn draw_detection(image: &mut RgbImage, detection: &Detection) {
    let b = detection.bbox;
    let (x1, y1, x2, y2) = (b.x1 as i64, b.y1 as i64, b.x2 as i64, b.y2 as i64);

    for t in 0..BOX_THICKNESS {
        fill_rect(image, x1, y1 + t, x2, y1 + t, BOX_COLOR);
        fill_rect(image, x1, y2 - t, x2, y2 - t, BOX_COLOR);
        fill_rect(image, x1 + t, y1, x1 + t, y2, BOX_COLOR);
        fill_rect(image, x2 - t, y1, x2 - t, y2, BOX_COLOR);
    }

    let caption = detection.caption();
    let text_w = caption.chars().count() as i64 * ADVANCE;
    let tab_top = y1 - TEXT_H - 2 * TAB_PAD;
    fill_rect(image, x1, tab_top, x1 + text_w + TAB_PAD, y1, BOX_COLOR);
    draw_text(image, x1 + TAB_PAD, tab_top + TAB_PAD, &caption, TEXT_COLOR);
}

/// Inclusive rectangle, clipped to the image.
fn fill_rect(image: &mut RgbImage, x1: i64, y1: i64, x2: i64, y2: i64, color: Rgb<u8>) {
    let (w, h) = (image.width() as i64, image.height() as i64);
    if w == 0 || h == 0 {
        return;
    }
    let (left, right) = (x1.min(x2).max(0), x1.max(x2).min(w - 1));
    let (top, bottom) = (y1.min(y2).max(0), y1.max(y2).min(h - 1));
    for y in top..=bottom {
        for x in left..=right {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn draw_text(image: &mut RgbImage, x: i64, y: i64, text: &str, color: Rgb<u8>) {
    for (i, c) in text.chars().enumerate() {
        let origin = x + i as i64 * ADVANCE;
        for (row, bits) in glyph(c).into_iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (0b100u8 >> col) == 0 {
                    continue;
                }
                let px = origin + col * SCALE;
                let py = y + row as i64 * SCALE;
                fill_rect(image, px, py, px + SCALE - 1, py + SCALE - 1, color);
            }
        }
    }
}

/// Rows top to bottom, bit 2 is the leftmost column. Letters are uppercase only.
fn glyph(c: char) -> [u8; 5] {
    match c.to_ascii_uppercase() {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'A' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'B' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'C' => [0b011, 0b100, 0b100, 0b100, 0b011],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'F' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'G' => [0b011, 0b100, 0b101, 0b101, 0b011],
        'H' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'J' => [0b001, 0b001, 0b001, 0b101, 0b010],
        'K' => [0b101, 0b101, 0b110, 0b101, 0b101],
        'L' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'M' => [0b101, 0b111, 0b111, 0b101, 0b101],
        'N' => [0b110, 0b101, 0b101, 0b101, 0b101],
        'O' => [0b010, 0b101, 0b101, 0b101, 0b010],
        'P' => [0b110, 0b101, 0b110, 0b100, 0b100],
        'Q' => [0b010, 0b101, 0b101, 0b110, 0b011],
        'R' => [0b110, 0b101, 0b110, 0b101, 0b101],
        'S' => [0b011, 0b100, 0b010, 0b001, 0b110],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'U' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'V' => [0b101, 0b101, 0b101, 0b101, 0b010],
        'W' => [0b101, 0b101, 0b111, 0b111, 0b101],
        'X' => [0b101, 0b101, 0b010, 0b101, 0b101],
        'Y' => [0b101, 0b101, 0b010, 0b010, 0b010],
        'Z' => [0b111, 0b001, 0b010, 0b100, 0b111],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        '_' => [0b000, 0b000, 0b000, 0b000, 0b111],
        ' ' => [0; 5],
        _ => [0b111, 0b001, 0b010, 0b000, 0b010],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn detection(x1: u32, y1: u32, x2: u32, y2: u32) -> Detection {
        Detection {
            label: "fish".into(),
            confidence: 0.9,
            bbox: BoundingBox { x1, y1, x2, y2 },
        }
    }

    #[test]
    fn box_outline_is_drawn_inside_the_corners() {
        let mut image = RgbImage::new(64, 64);
        draw_detection(&mut image, &detection(10, 30, 40, 50));

        assert_eq!(*image.get_pixel(10, 40), BOX_COLOR);
        assert_eq!(*image.get_pixel(11, 40), BOX_COLOR);
        assert_eq!(*image.get_pixel(40, 40), BOX_COLOR);
        assert_eq!(*image.get_pixel(25, 50), BOX_COLOR);
        // Interior untouched
        assert_eq!(*image.get_pixel(25, 40), Rgb([0, 0, 0]));
        // Caption tab sits above the box
        assert_eq!(*image.get_pixel(10, 30 - TEXT_H as u32 - 2), BOX_COLOR);
    }

    #[test]
    fn drawing_at_the_edges_is_clipped() {
        let mut image = RgbImage::new(16, 16);
        draw_detection(&mut image, &detection(0, 0, 15, 15));
        assert_eq!(*image.get_pixel(15, 15), BOX_COLOR);
        assert_eq!(*image.get_pixel(0, 0), BOX_COLOR);
    }

    #[test]
    fn caption_pixels_are_text_colored() {
        let mut image = RgbImage::from_pixel(200, 40, Rgb([255, 255, 255]));
        draw_detection(&mut image, &detection(0, 30, 100, 39));
        let tab_top = 30 - TEXT_H - 2 * TAB_PAD;
        let text_row = (tab_top + TAB_PAD) as u32..(tab_top + TAB_PAD + TEXT_H) as u32;
        let has_text = text_row
            .flat_map(|y| (0..200u32).map(move |x| (x, y)))
            .any(|(x, y)| *image.get_pixel(x, y) == TEXT_COLOR);
        assert!(has_text);
    }
}
