//! Motion gating.
//!
//! A detector keeps a background reference and reports the bounding box of
//! everything that changed since. A zero-width region means no motion.

use image::{ GrayImage, Luma };
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::dilate;
use imageproc::region_labelling::{ connected_components, Connectivity };

use std::collections::HashMap;

use crate::capture::Frame;
use crate::engine::Region;

pub trait MotionDetect {
    /// (Re)establishes the background reference from `frame`.
    fn reset(&mut self, frame: &Frame);

    /// Forgets the reference; the next frame is treated as all new.
    fn clear(&mut self);

    /// Bounding box of changed pixels, zero-sized when nothing moved.
    fn detect(&mut self, frame: &Frame) -> Region;
}

#[derive(Debug, Clone)]
pub struct MotionConfig {
    /// Gaussian blur applied before differencing
    pub blur_sigma: f32,
    /// Per-pixel luminance difference counted as change
    pub threshold: u8,
    /// Dilation radius joining nearby blobs
    pub dilate_radius: u8,
    /// Blobs smaller than this many pixels are noise
    pub min_area: u32,
    /// Weight of the new frame in the running-average background (0.0-1.0)
    pub learning_rate: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            blur_sigma: 2.0,
            threshold: 25,
            dilate_radius: 3,
            min_area: 64,
            learning_rate: 0.05,
        }
    }
}

/// Frame differencing against a running-average background.
pub struct FrameDifference {
    config: MotionConfig,
    background: Option<Background>,
}

struct Background {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl FrameDifference {
    pub fn new(config: MotionConfig) -> Self {
        Self { config, background: None }
    }

    fn prepare(&self, frame: &Frame) -> GrayImage {
        let gray = image::imageops::grayscale(frame.pixels());
        if self.config.blur_sigma > 0.0 {
            gaussian_blur_f32(&gray, self.config.blur_sigma)
        } else {
            gray
        }
    }

    fn foreground(&self, background: &Background, gray: &GrayImage) -> GrayImage {
        let threshold = self.config.threshold as f32;
        let width = gray.width();
        GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            let bg = background.values[(y * width + x) as usize];
            let diff = (gray.get_pixel(x, y)[0] as f32 - bg).abs();
            if diff > threshold { Luma([255]) } else { Luma([0]) }
        })
    }

    fn update_background(&mut self, gray: &GrayImage) {
        let rate = self.config.learning_rate;
        if let Some(bg) = self.background.as_mut() {
            bg.values.iter_mut().zip(gray.pixels()).for_each(|(v, p)| {
                *v = *v * (1.0 - rate) + p[0] as f32 * rate;
            });
        }
    }
}

impl Default for FrameDifference {
    fn default() -> Self {
        Self::new(MotionConfig::default())
    }
}

impl MotionDetect for FrameDifference {
    fn reset(&mut self, frame: &Frame) {
        let gray = self.prepare(frame);
        self.background = Some(Background {
            width: gray.width(),
            height: gray.height(),
            values: gray.pixels().map(|p| p[0] as f32).collect(),
        });
    }

    fn clear(&mut self) {
        self.background = None;
    }

    fn detect(&mut self, frame: &Frame) -> Region {
        let stale = match &self.background {
            Some(bg) => bg.width != frame.width() || bg.height != frame.height(),
            None => true,
        };
        if stale {
            // nothing to compare against, the whole frame is new
            self.reset(frame);
            return Region::full(frame.width(), frame.height());
        }

        let gray = self.prepare(frame);
        let mask = match &self.background {
            Some(bg) => self.foreground(bg, &gray),
            None => return Region::default(),
        };
        let mask = if self.config.dilate_radius > 0 {
            dilate(&mask, Norm::LInf, self.config.dilate_radius)
        } else {
            mask
        };
        self.update_background(&gray);

        bounding_box_of_blobs(&mask, self.config.min_area)
    }
}

/// Union of the bounding boxes of all foreground blobs with at least `min_area` pixels.
fn bounding_box_of_blobs(mask: &GrayImage, min_area: u32) -> Region {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));

    // label -> (min_x, min_y, max_x, max_y, area)
    let mut blobs: HashMap<u32, (u32, u32, u32, u32, u32)> = HashMap::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0];
        if label == 0 {
            continue;
        }
        let blob = blobs.entry(label).or_insert((x, y, x, y, 0));
        blob.0 = blob.0.min(x);
        blob.1 = blob.1.min(y);
        blob.2 = blob.2.max(x);
        blob.3 = blob.3.max(y);
        blob.4 += 1;
    }

    blobs.values()
        .filter(|blob| blob.4 >= min_area)
        .map(|&(x0, y0, x1, y1, _)| Region::new(x0, y0, x1 - x0 + 1, y1 - y0 + 1))
        .fold(Region::default(), |acc, r| acc.union(&r))
}
