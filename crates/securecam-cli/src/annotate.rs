//! Frame annotation: draw detection rectangles and identity labels onto RGB
//! frames before they go to the display sink.

use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use securecam_core::BoundingBox;

const MATCH_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: u32 = 2;
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;

const FONT_DATA: &[u8] = include_bytes!("../assets/font.ttf");

/// Draws detections onto frames, with an embedded label font.
pub struct Annotator<'a> {
    font: FontRef<'a>,
}

impl Default for Annotator<'_> {
    fn default() -> Self {
        // The font is compiled into the binary; a parse failure is a build
        // defect, not a runtime condition.
        let font = FontRef::try_from_slice(FONT_DATA).expect("embedded font is valid");
        Self { font }
    }
}

impl Annotator<'_> {
    /// Draw one detection onto the frame: outline plus identity label, green
    /// for a recognised identity, red for unknown. Boxes that miss the frame
    /// entirely are skipped.
    pub fn draw_detection(
        &self,
        frame: &mut RgbImage,
        face: &BoundingBox,
        identity: Option<(i64, &str)>,
    ) {
        let color = if identity.is_some() {
            MATCH_COLOR
        } else {
            UNKNOWN_COLOR
        };
        let Some((x, y, w, h)) = face.pixel_rect(frame.width(), frame.height()) else {
            return;
        };

        // Nested 1px rectangles give the outline its thickness.
        for t in 0..BOX_THICKNESS {
            if w > 2 * t && h > 2 * t {
                let rect = Rect::at((x + t) as i32, (y + t) as i32).of_size(w - 2 * t, h - 2 * t);
                draw_hollow_rect_mut(frame, rect, color);
            }
        }

        // Label just above the box, nudged inside when the box touches the
        // top edge.
        let label = label_text(identity);
        let label_y = (y as i32 - LABEL_TEXT_HEIGHT).max(0);
        draw_text_mut(
            frame,
            color,
            x as i32,
            label_y,
            PxScale::from(LABEL_FONT_SIZE),
            &self.font,
            &label,
        );
    }
}

/// Label painted next to a detection: the identity's id and name, or
/// "unknown".
fn label_text(identity: Option<(i64, &str)>) -> String {
    match identity {
        Some((id, name)) => format!("id {id}: {name}"),
        None => "unknown".to_string(),
    }
}
