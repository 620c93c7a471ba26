//! legend.rs — gradient legend rendering
//!
//! Draws the overlay legend into its own raster: a rounded dark panel with a
//! title, a 220×16 horizontal gradient strip sampled through the active
//! color ramp, and min/mid/max tick labels. The map host anchors the result
//! at a fixed screen offset, independent of pan/zoom.
//!
//! Text uses a built-in 5×7 pixel font (digits, A–Z, and the few symbols the
//! labels need) scaled ×2; lowercase maps to uppercase, unknown glyphs render
//! as blanks.

use crate::ramp::{ColorRamp, Rgba};
use crate::raster::Raster;

pub const GRADIENT_WIDTH: u32 = 220;
pub const GRADIENT_HEIGHT: u32 = 16;

const BOX_PAD: u32 = 8;
const CORNER_RADIUS: u32 = 10;
const TITLE_GAP: u32 = 6;
const TICK_GAP: u32 = 10;

const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;
const SCALE: u32 = 2;
/// Advance per character at the current scale (glyph + 1 column spacing).
const ADVANCE: u32 = (GLYPH_W + 1) * SCALE;

const PANEL_BG: Rgba = Rgba::new(0, 0, 0, 160);
const TEXT_COLOR: Rgba = Rgba::new(255, 255, 255, 255);

/// Build the gradient strip alone: `GRADIENT_WIDTH` ramp samples at full
/// alpha, repeated down `GRADIENT_HEIGHT` rows.
pub fn gradient_strip(vmin: f64, vmax: f64, ramp: ColorRamp) -> Raster {
    let mut strip = Raster::new(GRADIENT_WIDTH, GRADIENT_HEIGHT);
    for x in 0..GRADIENT_WIDTH {
        let t = x as f64 / (GRADIENT_WIDTH - 1) as f64;
        let v = vmin + t * (vmax - vmin);
        let c = ramp(v, vmin, vmax, 255);
        for y in 0..GRADIENT_HEIGHT {
            strip.set_pixel(x, y, c);
        }
    }
    strip
}

/// Render the full legend panel for a value range.
pub fn render_legend(title: &str, vmin: f64, vmax: f64, ramp: ColorRamp) -> Raster {
    let text_h = GLYPH_H * SCALE;
    let box_w = GRADIENT_WIDTH + BOX_PAD * 2;
    let box_h = text_h + TITLE_GAP + GRADIENT_HEIGHT + TICK_GAP + text_h + BOX_PAD * 2;

    let mut panel = Raster::new(box_w, box_h);
    panel.fill_round_rect(0, 0, box_w, box_h, CORNER_RADIUS, PANEL_BG);

    let title_y = BOX_PAD;
    draw_text(&mut panel, BOX_PAD, title_y, title, TEXT_COLOR);

    let grad_y = title_y + text_h + TITLE_GAP;
    let strip = gradient_strip(vmin, vmax, ramp);
    panel.blit(&strip, BOX_PAD, grad_y);

    // min left-aligned, mid centered, max right-aligned under the strip
    let tick_y = grad_y + GRADIENT_HEIGHT + TICK_GAP;
    let mid = (vmin + vmax) / 2.0;
    let labels = [format!("{vmin:.1}"), format!("{mid:.1}"), format!("{vmax:.1}")];
    let anchors = [
        BOX_PAD,
        BOX_PAD + GRADIENT_WIDTH / 2,
        BOX_PAD + GRADIENT_WIDTH,
    ];
    for (i, label) in labels.iter().enumerate() {
        let w = text_width(label);
        let x = match i {
            0 => anchors[0],
            1 => anchors[1].saturating_sub(w / 2),
            _ => anchors[2].saturating_sub(w),
        };
        draw_text(&mut panel, x, tick_y, label, TEXT_COLOR);
    }

    panel
}

/// Pixel width of a string at the legend scale.
pub fn text_width(s: &str) -> u32 {
    let n = s.chars().count() as u32;
    if n == 0 {
        0
    } else {
        n * ADVANCE - SCALE
    }
}

fn draw_text(raster: &mut Raster, x0: u32, y0: u32, text: &str, color: Rgba) {
    let mut x = x0;
    for ch in text.chars() {
        draw_glyph(raster, x, y0, ch, color);
        x += ADVANCE;
    }
}

fn draw_glyph(raster: &mut Raster, x0: u32, y0: u32, ch: char, color: Rgba) {
    let rows = glyph(ch);
    for (row, bits) in rows.iter().enumerate() {
        for col in 0..GLYPH_W {
            if bits & (0b10000 >> col) == 0 {
                continue;
            }
            let px = x0 + col * SCALE;
            let py = y0 + row as u32 * SCALE;
            for dy in 0..SCALE {
                for dx in 0..SCALE {
                    raster.set_pixel(px + dx, py + dy, color);
                }
            }
        }
    }
}

/// 5×7 glyph rows, MSB = left column of the 5-bit row.
fn glyph(ch: char) -> [u8; 7] {
    match ch.to_ascii_uppercase() {
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
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100],
        '-' => [0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000],
        '%' => [0b11001, 0b11010, 0b00010, 0b00100, 0b01000, 0b01011, 0b10011],
        '/' => [0b00001, 0b00010, 0b00010, 0b00100, 0b01000, 0b01000, 0b10000],
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
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
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        _ => [0; 7], // space and anything unmapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ramp::default_ramp;

    #[test]
    fn gradient_endpoints_follow_the_ramp() {
        let strip = gradient_strip(0.0, 10.0, default_ramp);
        let left = strip.pixel(0, 8);
        let right = strip.pixel(GRADIENT_WIDTH - 1, 8);
        assert_eq!((left.r, left.g, left.b, left.a), (0, 0, 255, 255));
        assert_eq!((right.r, right.g, right.b, right.a), (255, 0, 0, 255));
    }

    #[test]
    fn legend_panel_has_expected_dimensions() {
        let legend = render_legend("PH", 4.5, 8.5, default_ramp);
        assert_eq!(legend.width, GRADIENT_WIDTH + 2 * BOX_PAD);
        let text_h = GLYPH_H * SCALE;
        assert_eq!(
            legend.height,
            text_h + TITLE_GAP + GRADIENT_HEIGHT + TICK_GAP + text_h + 2 * BOX_PAD
        );
    }

    #[test]
    fn panel_background_is_translucent_black() {
        let legend = render_legend("EC", 0.0, 1.0, default_ramp);
        // Center of the panel edge, away from corners and text.
        let c = legend.pixel(legend.width / 2, legend.height - 1);
        assert_eq!(c, Rgba::new(0, 0, 0, 160));
    }

    #[test]
    fn text_width_counts_advance() {
        assert_eq!(text_width(""), 0);
        assert_eq!(text_width("1"), ADVANCE - SCALE);
        assert_eq!(text_width("6.8"), 3 * ADVANCE - SCALE);
    }
}
