//! Geometric and photometric signals extracted from one face.
//!
//! Landmark signals follow the 68-point dlib layout. Mouth-shape signals work
//! on a grayscale face crop and need no landmarks at all.

use image::{imageops, GrayImage};

use crate::models::Point;

pub const LANDMARK_COUNT: usize = 68;

const JAW: std::ops::Range<usize> = 0..17;
const LEFT_EYEBROW: std::ops::Range<usize> = 17..22;
const RIGHT_EYEBROW: std::ops::Range<usize> = 22..27;
const NOSE: std::ops::Range<usize> = 27..36;
const LEFT_EYE: std::ops::Range<usize> = 36..42;
const RIGHT_EYE: std::ops::Range<usize> = 42..48;
const MOUTH: std::ops::Range<usize> = 48..68;

/// Score used when no landmarks are available for the face.
pub const FALLBACK_FEATURE_SCORE: f64 = 50.0;

#[derive(Debug, Clone, PartialEq)]
pub struct FacialFeatureSet {
    pub left_eye: Vec<Point>,
    pub right_eye: Vec<Point>,
    pub left_eyebrow: Vec<Point>,
    pub right_eyebrow: Vec<Point>,
    pub nose: Vec<Point>,
    pub mouth: Vec<Point>,
    pub jaw: Vec<Point>,
}

impl FacialFeatureSet {
    /// `None` unless given exactly 68 finite points.
    pub fn from_landmarks(points: &[Point]) -> Option<Self> {
        if points.len() != LANDMARK_COUNT
            || points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return None;
        }

        Some(Self {
            left_eye: points[LEFT_EYE].to_vec(),
            right_eye: points[RIGHT_EYE].to_vec(),
            left_eyebrow: points[LEFT_EYEBROW].to_vec(),
            right_eyebrow: points[RIGHT_EYEBROW].to_vec(),
            nose: points[NOSE].to_vec(),
            mouth: points[MOUTH].to_vec(),
            jaw: points[JAW].to_vec(),
        })
    }
}

/// Lower values mean more closed eyes. A collapsed contour has no ratio and
/// yields NaN, which never trips the closed-eye thresholds.
pub fn eye_aspect_ratio(eye: &[Point]) -> f64 {
    let vertical = eye[1].distance(&eye[5]) + eye[2].distance(&eye[4]);
    let horizontal = eye[0].distance(&eye[3]);
    if horizontal == 0.0 {
        f64::NAN
    } else {
        vertical / (2.0 * horizontal)
    }
}

fn centroid(points: &[Point]) -> Point {
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Point::new(sx / n, sy / n)
}

/// Distance between eyebrow and eye centroids; small means furrowed brows.
pub fn eyebrow_distance(eyebrow: &[Point], eye: &[Point]) -> f64 {
    centroid(eyebrow).distance(&centroid(eye))
}

/// Returns `(aspect_ratio, downturn)`. Downturn is how far the mouth corners
/// sit below the lip centre, never negative.
pub fn mouth_aspect_ratio(mouth: &[Point]) -> (f64, f64) {
    let left_corner = mouth[0];
    let right_corner = mouth[6];
    let top_center = mouth[3];
    let bottom_center = mouth[9];

    let vertical = top_center.distance(&bottom_center);
    let horizontal = left_corner.distance(&right_corner);

    let center_y = (top_center.y + bottom_center.y) / 2.0;
    let corner_y = (left_corner.y + right_corner.y) / 2.0;
    let downturn = (corner_y - center_y).max(0.0);

    let ratio = if horizontal > 0.0 {
        vertical / horizontal
    } else {
        0.0
    };
    (ratio, downturn)
}

/// Mean of the per-axis population variances of the jaw line.
pub fn jaw_variance(jaw: &[Point]) -> f64 {
    let mean = centroid(jaw);
    let n = jaw.len() as f64;
    let (vx, vy) = jaw.iter().fold((0.0, 0.0), |(vx, vy), p| {
        (vx + (p.x - mean.x).powi(2), vy + (p.y - mean.y).powi(2))
    });
    (vx / n + vy / n) / 2.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometricSignals {
    pub eye_aspect_ratio: f64,
    pub eyebrow_distance: f64,
    pub mouth_aspect_ratio: f64,
    pub mouth_downturn: f64,
    pub jaw_variance: f64,
}

impl GeometricSignals {
    pub fn measure(features: &FacialFeatureSet) -> Self {
        let eye_aspect_ratio = (eye_aspect_ratio(&features.left_eye)
            + eye_aspect_ratio(&features.right_eye))
            / 2.0;
        let eyebrow_distance = (eyebrow_distance(&features.left_eyebrow, &features.left_eye)
            + eyebrow_distance(&features.right_eyebrow, &features.right_eye))
            / 2.0;
        let (mouth_aspect_ratio, mouth_downturn) = mouth_aspect_ratio(&features.mouth);

        Self {
            eye_aspect_ratio,
            eyebrow_distance,
            mouth_aspect_ratio,
            mouth_downturn,
            jaw_variance: jaw_variance(&features.jaw),
        }
    }

    /// Point rubric over the sadness indicators. Every indicator adds the
    /// same amount to score and confidence before normalization.
    pub fn sadness_score(&self) -> f64 {
        let mut score = 0.0;
        let mut confidence = 0.0;
        let mut add = |points: f64| {
            score += points;
            confidence += points;
        };

        // open eyes sit around 0.25-0.30
        if self.eye_aspect_ratio < 0.20 {
            add(30.0);
        } else if self.eye_aspect_ratio < 0.25 {
            add(20.0);
        }

        if self.eyebrow_distance < 15.0 {
            add(25.0);
        } else if self.eyebrow_distance < 20.0 {
            add(15.0);
        }

        if self.mouth_downturn > 5.0 {
            add(35.0);
        } else if self.mouth_downturn > 2.0 {
            add(20.0);
        }

        // tight lips
        if self.mouth_aspect_ratio < 0.3 {
            add(10.0);
        }

        // tense jaw
        if self.jaw_variance < 50.0 {
            add(10.0);
        }

        if confidence > 0.0 {
            (score / confidence * 100.0_f64).min(100.0)
        } else {
            score
        }
    }
}

/// Sadness score from landmarks, or [`FALLBACK_FEATURE_SCORE`] without them.
pub fn feature_score(features: Option<&FacialFeatureSet>) -> f64 {
    match features {
        Some(features) => GeometricSignals::measure(features).sadness_score(),
        None => FALLBACK_FEATURE_SCORE,
    }
}

/// Brightness and edge statistics of the mouth area of a grayscale face crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouthSignals {
    /// Mean of the corner thirds minus the centre third. Positive when
    /// teeth or raised corners brighten the sides.
    pub brightness_diff: f64,
    /// Corners heavier in the lower half while the centre sits high.
    pub inverted_smile: f64,
    /// Edge mass in the lower half over the upper half.
    pub edge_ratio: f64,
}

impl MouthSignals {
    fn flat() -> Self {
        Self {
            brightness_diff: 0.0,
            inverted_smile: 0.0,
            edge_ratio: 1.0,
        }
    }

    pub fn measure(face: &GrayImage) -> Self {
        let (width, height) = face.dimensions();
        let mouth_top = height / 2;
        let roi_top = mouth_top + ((height - mouth_top) as f64 * 0.2) as u32;
        let roi_height = height - roi_top;

        if roi_height <= 10 || width <= 10 {
            return Self::flat();
        }

        let roi = imageops::crop_imm(face, 0, roi_top, width, roi_height).to_image();
        let third = width / 3;
        let columns = [(0, third), (third, 2 * third), (2 * third, width)];
        let half = roi_height / 2;

        let full: Vec<f64> = columns
            .iter()
            .map(|&(x0, x1)| region_mean(&roi, x0, x1, 0, roi_height))
            .collect();
        let top: Vec<f64> = columns
            .iter()
            .map(|&(x0, x1)| region_mean(&roi, x0, x1, 0, half))
            .collect();
        let bottom: Vec<f64> = columns
            .iter()
            .map(|&(x0, x1)| region_mean(&roi, x0, x1, half, roi_height))
            .collect();

        let brightness_diff = (full[0] + full[2]) / 2.0 - full[1];
        let corner_bottom_bias = (bottom[0] + bottom[2]) / 2.0 - (top[0] + top[2]) / 2.0;
        let center_top_bias = top[1] - bottom[1];

        let edges = edge_map(&roi, 50.0, 150.0);
        let top_edges = edge_mass(&edges, 0, half);
        let bottom_edges = edge_mass(&edges, half, roi_height);

        Self {
            brightness_diff,
            inverted_smile: corner_bottom_bias + center_top_bias,
            edge_ratio: bottom_edges / (top_edges + 1.0),
        }
    }
}

fn region_mean(image: &GrayImage, x0: u32, x1: u32, y0: u32, y1: u32) -> f64 {
    let mut total = 0.0;
    let mut count = 0usize;
    for y in y0..y1 {
        for x in x0..x1 {
            total += image.get_pixel(x, y)[0] as f64;
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

fn edge_mass(edges: &GrayImage, y0: u32, y1: u32) -> f64 {
    let mut total = 0.0;
    for y in y0..y1 {
        for x in 0..edges.width() {
            total += edges.get_pixel(x, y)[0] as f64;
        }
    }
    total
}

/// Canny-style edge map (0 or 255 per pixel): 3x3 Sobel with L1 magnitude,
/// non-maximum suppression, then hysteresis between `low` and `high`.
pub fn edge_map(image: &GrayImage, low: f64, high: f64) -> GrayImage {
    let (width, height) = image.dimensions();
    let (w, h) = (width as i64, height as i64);
    let at = |x: i64, y: i64| -> f64 {
        let x = x.clamp(0, w - 1) as u32;
        let y = y.clamp(0, h - 1) as u32;
        image.get_pixel(x, y)[0] as f64
    };

    let idx = |x: i64, y: i64| (y * w + x) as usize;
    let mut magnitude = vec![0.0f64; (w * h) as usize];
    let mut direction = vec![0u8; (w * h) as usize];

    for y in 0..h {
        for x in 0..w {
            let gx = (at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x - 1, y) + at(x - 1, y + 1));
            let gy = (at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x, y - 1) + at(x + 1, y - 1));
            magnitude[idx(x, y)] = gx.abs() + gy.abs();

            let mut angle = gy.atan2(gx).to_degrees();
            if angle < 0.0 {
                angle += 180.0;
            }
            direction[idx(x, y)] = match angle {
                a if !(22.5..157.5).contains(&a) => 0,
                a if a < 67.5 => 1,
                a if a < 112.5 => 2,
                _ => 3,
            };
        }
    }

    let mag = |x: i64, y: i64| -> f64 {
        if x < 0 || y < 0 || x >= w || y >= h {
            0.0
        } else {
            magnitude[idx(x, y)]
        }
    };

    // 0 = none, 1 = weak, 2 = strong
    let mut class = vec![0u8; (w * h) as usize];
    let mut stack = Vec::new();
    for y in 0..h {
        for x in 0..w {
            let m = magnitude[idx(x, y)];
            if m <= low {
                continue;
            }
            let ((ax, ay), (bx, by)) = match direction[idx(x, y)] {
                0 => ((x - 1, y), (x + 1, y)),
                1 => ((x - 1, y - 1), (x + 1, y + 1)),
                2 => ((x, y - 1), (x, y + 1)),
                _ => ((x + 1, y - 1), (x - 1, y + 1)),
            };
            if m > mag(ax, ay) && m >= mag(bx, by) {
                if m > high {
                    class[idx(x, y)] = 2;
                    stack.push((x, y));
                } else {
                    class[idx(x, y)] = 1;
                }
            }
        }
    }

    while let Some((x, y)) = stack.pop() {
        for dy in -1..=1 {
            for dx in -1..=1 {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= w || ny >= h {
                    continue;
                }
                if class[idx(nx, ny)] == 1 {
                    class[idx(nx, ny)] = 2;
                    stack.push((nx, ny));
                }
            }
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        if class[idx(x as i64, y as i64)] == 2 {
            image::Luma([255])
        } else {
            image::Luma([0])
        }
    })
}
