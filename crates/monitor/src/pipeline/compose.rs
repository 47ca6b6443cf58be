//! Software rendering of the fused preview.
//!
//! The preview is a 2x2 grid of half-size views: box and pose on top, bottom
//! fraction and the combined blend below. Overlays are drawn with a tiny 5x7
//! bitmap font so no font rendering dependency is needed.

use image::{Rgb, RgbImage, codecs::jpeg::JpegEncoder, imageops};
use ml_core::{KeypointIndex, PersonDetection};

use crate::fusion::{FusionReport, Heuristic};

const UK_BLUE: Rgb<u8> = Rgb([0, 51, 160]);
const BLUEGRASS: Rgb<u8> = Rgb([30, 138, 255]);
const GOLDENROD: Rgb<u8> = Rgb([255, 220, 0]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BACKDROP: Rgb<u8> = Rgb([0, 0, 0]);
const PLACEHOLDER: Rgb<u8> = Rgb([32, 32, 40]);

const GLYPH_ADVANCE: i32 = 6;
/// How far past the panel edge a detector coordinate may land before clamping.
const OFFSCREEN_MARGIN: f32 = 16.0;

/// Downscale a decoded frame to the per-view size.
pub fn half_size(image: &RgbImage) -> RgbImage {
    let (w, h) = image.dimensions();
    imageops::resize(
        image,
        (w / 2).max(1),
        (h / 2).max(1),
        imageops::FilterType::Triangle,
    )
}

/// Assemble the four annotated views into one image twice the view size.
pub fn render_grid(view: &RgbImage, report: &FusionReport) -> RgbImage {
    let box_panel = box_view(view, report);
    let pose_panel = pose_view(view, report);
    let bottom_panel = bottom_view(view, report);
    let combined_panel = combined_view(&box_panel, &pose_panel, &bottom_panel, report);

    let (w, h) = view.dimensions();
    let mut grid = RgbImage::new(w * 2, h * 2);
    imageops::replace(&mut grid, &box_panel, 0, 0);
    imageops::replace(&mut grid, &pose_panel, w as i64, 0);
    imageops::replace(&mut grid, &bottom_panel, 0, h as i64);
    imageops::replace(&mut grid, &combined_panel, w as i64, h as i64);
    grid
}

/// Scale a decoded frame to `width`x`height` for the show modes.
pub fn fit_frame(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    imageops::resize(image, width.max(1), height.max(1), imageops::FilterType::Triangle)
}

/// Paint sunglasses and a mustache on every face whose nose, eyes and ears
/// were all found.
pub fn draw_glasses(image: &mut RgbImage, people: &[PersonDetection]) {
    let (w, h) = image.dimensions();
    let reach = w.max(h) as f32;
    for person in people {
        let face = [
            KeypointIndex::Nose,
            KeypointIndex::LeftEye,
            KeypointIndex::RightEye,
            KeypointIndex::LeftEar,
            KeypointIndex::RightEar,
        ]
        .map(|idx| {
            person
                .keypoint(idx)
                .filter(|kp| kp.is_detected())
                .and_then(|kp| Some((to_pixel(kp.x, w)?, to_pixel(kp.y, h)?)))
        });
        let [Some(nose), Some(left_eye), Some(right_eye), Some(left_ear), Some(right_ear)] = face
        else {
            continue;
        };

        let eye_distance = ((right_eye.0 - left_eye.0) as f32)
            .hypot((right_eye.1 - left_eye.1) as f32)
            .min(reach);
        let lens = (eye_distance * 0.4) as i32;
        let thickness = (lens / 4).max(1);

        fill_circle(image, left_eye, lens, BACKDROP);
        fill_circle(image, right_eye, lens, BACKDROP);

        let left_frame = (left_eye.0 + lens, left_eye.1);
        let right_frame = (right_eye.0 - lens, right_eye.1);
        draw_thick_line(image, left_frame, (left_ear.0, left_ear.1 - lens), thickness, BACKDROP);
        draw_thick_line(image, right_frame, (right_ear.0, right_ear.1 - lens), thickness, BACKDROP);
        draw_thick_line(image, left_frame, right_frame, thickness, BACKDROP);

        let length = (eye_distance * 0.48) as i32;
        let droop = (length as f32 * 0.3) as i32;
        let mustache_y = nose.1 + (eye_distance * 0.32 * 1.2) as i32;
        let root = (nose.0, mustache_y);
        draw_thick_line(image, root, (nose.0 - length, mustache_y + droop), thickness, BACKDROP);
        draw_thick_line(image, root, (nose.0 + length, mustache_y + droop), thickness, BACKDROP);
    }
}

/// Frame shown while the stream is offline.
pub fn offline_placeholder(width: u32, height: u32, last_frame_time: Option<&str>) -> RgbImage {
    let mut image = RgbImage::from_pixel(width.max(1), height.max(1), PLACEHOLDER);
    let center_y = height as i32 / 2;
    draw_banner(&mut image, center_y - 12, "STREAM OFFLINE", WHITE);
    let last = match last_frame_time {
        Some(time) => format!("LAST FRAME {time}"),
        None => "NO FRAME RECEIVED".to_string(),
    };
    draw_banner(&mut image, center_y + 4, &last, GOLDENROD);
    image
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).encode_image(image)?;
    Ok(buffer)
}

fn box_view(view: &RgbImage, report: &FusionReport) -> RgbImage {
    let mut panel = view.clone();
    for person in &report.views.boxes {
        let Some([x1, y1, x2, y2]) = person.bbox else {
            continue;
        };
        let (w, h) = panel.dimensions();
        let (Some(left), Some(top), Some(right), Some(bottom)) = (
            to_pixel(x1, w),
            to_pixel(y1, h),
            to_pixel(x2, w),
            to_pixel(y2, h),
        ) else {
            continue;
        };
        let color = if y2 - y1 < x2 - x1 { RED } else { UK_BLUE };
        draw_rectangle(&mut panel, left, top, right, bottom, color);
        draw_rectangle(
            &mut panel,
            left.saturating_add(1),
            top.saturating_add(1),
            right.saturating_sub(1),
            bottom.saturating_sub(1),
            color,
        );
    }
    caption(&mut panel, report, Heuristic::BoxAspect, "BOX");
    panel
}

fn pose_view(view: &RgbImage, report: &FusionReport) -> RgbImage {
    let mut panel = view.clone();
    for person in &report.views.pose {
        draw_skeleton_points(&mut panel, person, BLUEGRASS);
        let joints = [
            KeypointIndex::LeftShoulder,
            KeypointIndex::RightShoulder,
            KeypointIndex::LeftHip,
            KeypointIndex::RightHip,
        ]
        .map(|idx| person.keypoint(idx).filter(|kp| kp.is_detected()));
        if let [Some(ls), Some(rs), Some(lh), Some(rh)] = joints {
            let (w, h) = panel.dimensions();
            let shoulders = ls.midpoint(&rs);
            let hips = lh.midpoint(&rh);
            if let (Some(sx), Some(sy), Some(hx), Some(hy)) = (
                to_pixel(shoulders.x, w),
                to_pixel(shoulders.y, h),
                to_pixel(hips.x, w),
                to_pixel(hips.y, h),
            ) {
                draw_line(&mut panel, (sx, sy), (hx, hy), GOLDENROD);
            }
        }
    }
    caption(&mut panel, report, Heuristic::PoseGeometry, "POSE");
    panel
}

fn bottom_view(view: &RgbImage, report: &FusionReport) -> RgbImage {
    let mut panel = view.clone();
    let midline = (panel.height() / 2) as i32;
    let right = panel.width() as i32 - 1;
    fill_rect(&mut panel, 0, midline - 1, right, midline, UK_BLUE);
    for person in &report.views.bottom {
        draw_skeleton_points(&mut panel, person, BLUEGRASS);
    }
    caption(&mut panel, report, Heuristic::BottomFraction, "BOTTOM");
    panel
}

fn combined_view(
    box_panel: &RgbImage,
    pose_panel: &RgbImage,
    bottom_panel: &RgbImage,
    report: &FusionReport,
) -> RgbImage {
    let mut panel = RgbImage::new(box_panel.width(), box_panel.height());
    for (x, y, px) in panel.enumerate_pixels_mut() {
        let (a, b, c) = (
            box_panel.get_pixel(x, y),
            pose_panel.get_pixel(x, y),
            bottom_panel.get_pixel(x, y),
        );
        for ch in 0..3 {
            px[ch] = ((a[ch] as u16 + b[ch] as u16 + c[ch] as u16) / 3) as u8;
        }
    }
    caption(&mut panel, report, Heuristic::Combined, "COMBINED");
    if report.combined_fallen {
        draw_banner(&mut panel, 24, "PERSON IS FALLEN", RED);
    }
    panel
}

fn caption(panel: &mut RgbImage, report: &FusionReport, heuristic: Heuristic, name: &str) {
    draw_text_boxed(panel, 4, 4, name, WHITE);
    if report.fallen(heuristic) && heuristic != Heuristic::Combined {
        let text = "FALL DETECTED";
        let x = panel.width() as i32 - text.len() as i32 * GLYPH_ADVANCE - 6;
        draw_text_boxed(panel, x, 4, text, RED);
    }
}

fn draw_skeleton_points(panel: &mut RgbImage, person: &PersonDetection, color: Rgb<u8>) {
    let (w, h) = panel.dimensions();
    for kp in person.detected_keypoints() {
        let (Some(x), Some(y)) = (to_pixel(kp.x, w), to_pixel(kp.y, h)) else {
            continue;
        };
        fill_rect(
            panel,
            x.saturating_sub(2),
            y.saturating_sub(2),
            x.saturating_add(2),
            y.saturating_add(2),
            color,
        );
    }
}

/// Detector coordinate as a pixel index. Non-finite values are dropped and
/// anything far outside the panel is pulled in to just past its edge.
fn to_pixel(value: f32, extent: u32) -> Option<i32> {
    value
        .is_finite()
        .then(|| value.clamp(-OFFSCREEN_MARGIN, extent as f32 + OFFSCREEN_MARGIN) as i32)
}

/// Centered text on a dark strip.
fn draw_banner(image: &mut RgbImage, y: i32, text: &str, color: Rgb<u8>) {
    let width = text.chars().count() as i32 * GLYPH_ADVANCE;
    let x = ((image.width() as i32 - width) / 2).max(0);
    draw_text_boxed(image, x, y, text, color);
}

fn draw_text_boxed(image: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let width = text.chars().count() as i32 * GLYPH_ADVANCE;
    fill_rect(image, x - 2, y - 2, x + width, y + 8, BACKDROP);
    draw_label(image, x, y, text, color);
}

fn draw_rectangle(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 || right < 0 || bottom < 0 || left >= w || top >= h {
        return;
    }
    let l = left.clamp(0, w - 1);
    let r = right.clamp(0, w - 1);
    let t = top.clamp(0, h - 1);
    let b = bottom.clamp(0, h - 1);
    for x in l..=r {
        image.put_pixel(x as u32, t as u32, color);
        image.put_pixel(x as u32, b as u32, color);
    }
    for y in t..=b {
        image.put_pixel(l as u32, y as u32, color);
        image.put_pixel(r as u32, y as u32, color);
    }
}

fn fill_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 || right < 0 || bottom < 0 || left >= w || top >= h {
        return;
    }
    for y in top.max(0)..=bottom.min(h - 1) {
        for x in left.max(0)..=right.min(w - 1) {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn draw_line(image: &mut RgbImage, from: (i32, i32), to: (i32, i32), color: Rgb<u8>) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        fill_rect(image, x, y, x.saturating_add(1), y.saturating_add(1), color);
        if (x, y) == to {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn draw_thick_line(
    image: &mut RgbImage,
    from: (i32, i32),
    to: (i32, i32),
    thickness: i32,
    color: Rgb<u8>,
) {
    let half = thickness / 2;
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        fill_rect(image, x - half, y - half, x + half, y + half, color);
        if (x, y) == to {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn fill_circle(image: &mut RgbImage, center: (i32, i32), radius: i32, color: Rgb<u8>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let r2 = radius * radius;
    for y in (center.1 - radius).max(0)..=(center.1 + radius).min(h - 1) {
        for x in (center.0 - radius).max(0)..=(center.0 + radius).min(w - 1) {
            let (ox, oy) = (x - center.0, y - center.1);
            if ox * ox + oy * oy <= r2 {
                image.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

fn draw_label(image: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    for (i, ch) in text.chars().flat_map(char::to_uppercase).enumerate() {
        let Some(rows) = glyph(ch) else {
            continue;
        };
        let origin = x + i as i32 * GLYPH_ADVANCE;
        for (row, bits) in rows.iter().enumerate() {
            let py = y + row as i32;
            if !(0..h).contains(&py) {
                continue;
            }
            for col in 0..5 {
                let px = origin + col;
                if bits & (0x10 >> col) != 0 && (0..w).contains(&px) {
                    image.put_pixel(px as u32, py as u32, color);
                }
            }
        }
    }
}

/// 5x7 glyphs, one byte per row, most significant of the low five bits on the left.
fn glyph(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x1E, 0x10, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x1E, 0x10, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x19, 0x15, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x0E, 0x01, 0x01, 0x11, 0x0E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1E, 0x01, 0x01, 0x0E, 0x01, 0x01, 0x1E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::BoxAnalysis;

    fn fallen_report() -> FusionReport {
        let mut report = FusionReport {
            boxes: BoxAnalysis {
                fallen: true,
                person_count: 1,
                people: Vec::new(),
            },
            pose_fallen: true,
            bottom_fallen: true,
            combined_fallen: true,
            ..Default::default()
        };
        report.views.boxes.push(PersonDetection {
            bbox: Some([10.0, 60.0, 120.0, 100.0]),
            ..Default::default()
        });
        report
    }

    #[test]
    fn grid_is_twice_the_view_size() {
        let view = RgbImage::from_pixel(160, 120, Rgb([90, 90, 90]));
        let grid = render_grid(&view, &FusionReport::default());
        assert_eq!(grid.dimensions(), (320, 240));
    }

    #[test]
    fn fallen_boxes_are_outlined_in_red() {
        let view = RgbImage::from_pixel(160, 120, Rgb([90, 90, 90]));
        let grid = render_grid(&view, &fallen_report());
        assert_eq!(*grid.get_pixel(10, 80), RED);
        // the pose panel is untouched at the same spot
        assert_eq!(*grid.get_pixel(170, 80), Rgb([90, 90, 90]));
    }

    #[test]
    fn half_size_never_collapses_to_zero() {
        assert_eq!(half_size(&RgbImage::new(1, 1)).dimensions(), (1, 1));
        assert_eq!(half_size(&RgbImage::new(640, 480)).dimensions(), (320, 240));
    }

    #[test]
    fn placeholder_encodes_as_jpeg() {
        let image = offline_placeholder(320, 240, Some("12:00:01"));
        let jpeg = encode_jpeg(&image, 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (320, 240));
    }

    #[test]
    fn wild_detector_coordinates_are_clamped_or_skipped() {
        let view = RgbImage::from_pixel(160, 120, Rgb([90, 90, 90]));
        let mut person = PersonDetection {
            bbox: Some([f32::NAN, -5e9, 5e9, f32::INFINITY]),
            keypoints: vec![ml_core::Keypoint::default(); KeypointIndex::COUNT],
            score: 0.5,
        };
        for (idx, (x, y)) in [
            (KeypointIndex::LeftShoulder, (5e9, 5e9)),
            (KeypointIndex::RightShoulder, (f32::MAX, f32::MAX)),
            (KeypointIndex::LeftHip, (f32::NAN, 40.0)),
            (KeypointIndex::RightHip, (-5e9, f32::NEG_INFINITY)),
        ] {
            person.keypoints[idx as usize] = ml_core::Keypoint::new(x, y);
        }
        let mut report = FusionReport::default();
        report.views.boxes.push(PersonDetection {
            bbox: Some([-5e9, 10.0, 5e9, 20.0]),
            ..Default::default()
        });
        report.views.boxes.push(person.clone());
        report.views.pose.push(person.clone());
        report.views.bottom.push(person);

        let grid = render_grid(&view, &report);
        assert_eq!(grid.dimensions(), (320, 240));
        // the wide box is clamped to the panel and still drawn along its top
        assert_eq!(*grid.get_pixel(80, 10), RED);
    }

    fn face(points: [(f32, f32); 5]) -> PersonDetection {
        let mut keypoints = vec![ml_core::Keypoint::default(); KeypointIndex::COUNT];
        for (slot, (x, y)) in keypoints.iter_mut().zip(points) {
            *slot = ml_core::Keypoint::new(x, y);
        }
        PersonDetection {
            keypoints,
            ..Default::default()
        }
    }

    #[test]
    fn glasses_cover_both_eyes() {
        let mut image = RgbImage::from_pixel(200, 200, Rgb([200, 200, 200]));
        let person = face([
            (100.0, 110.0),
            (120.0, 90.0),
            (80.0, 90.0),
            (135.0, 95.0),
            (65.0, 95.0),
        ]);
        draw_glasses(&mut image, &[person]);
        assert_eq!(*image.get_pixel(120, 90), BACKDROP);
        assert_eq!(*image.get_pixel(80, 90), BACKDROP);
        assert_eq!(*image.get_pixel(10, 190), Rgb([200, 200, 200]));
    }

    #[test]
    fn glasses_need_the_whole_face() {
        let mut image = RgbImage::from_pixel(200, 200, Rgb([200, 200, 200]));
        let mut person = face([
            (100.0, 110.0),
            (120.0, 90.0),
            (80.0, 90.0),
            (135.0, 95.0),
            (65.0, 95.0),
        ]);
        person.keypoints[KeypointIndex::LeftEar as usize] = ml_core::Keypoint::default();
        let wild = face([(f32::NAN, 0.5); 5]);
        draw_glasses(&mut image, &[person, wild]);
        assert!(image.pixels().all(|px| *px == Rgb([200, 200, 200])));
    }

    #[test]
    fn show_frames_are_scaled_to_the_requested_size() {
        let image = RgbImage::new(1280, 720);
        assert_eq!(fit_frame(&image, 640, 480).dimensions(), (640, 480));
    }

    #[test]
    fn drawing_outside_the_image_is_clipped() {
        let mut image = RgbImage::new(8, 8);
        draw_rectangle(&mut image, -20, -20, -5, -5, RED);
        fill_rect(&mut image, 10, 10, 20, 20, RED);
        draw_line(&mut image, (-4, -4), (12, 12), RED);
        draw_label(&mut image, 6, 6, "OFFLINE", WHITE);
        assert_eq!(*image.get_pixel(3, 3), RED);
    }
}
