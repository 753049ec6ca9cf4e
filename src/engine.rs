//! Recognition interface and the JSON result model.
//!
//! The driver only ever talks to a [`Recognizer`]; which backend sits behind it is
//! decided by [`load_engine`] from the compiled-in features.

use serde::{ Deserialize, Serialize };

use std::path::PathBuf;
use std::time::{ SystemTime, UNIX_EPOCH };

use crate::capture::Frame;
use crate::error::LprError;

/// Version of the result layout written to stdout.
pub const RESULTS_VERSION: u32 = 2;

/// Axis-aligned rectangle in frame pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Smallest region covering both.
    pub fn union(&self, other: &Region) -> Region {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = (self.x + self.width).max(other.x + other.width);
        let bottom = (self.y + self.height).max(other.y + other.height);
        Region::new(x, y, right - x, bottom - y)
    }

    /// Clips the region to a `width` x `height` frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Region {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Region::new(x, y, self.width.min(width - x), self.height.min(height - y))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub plate: String,
    pub confidence: f32,
}

/// One plate found in a frame, best candidate first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateResult {
    pub plate: String,
    pub confidence: f32,
    pub region: String,
    pub region_confidence: u32,
    pub requested_topn: usize,
    pub processing_time_ms: f32,
    pub coordinates: [Point; 4],
    pub candidates: Vec<Candidate>,
}

impl PlateResult {
    /// Builds a result from a bounding box and its candidates; the best candidate becomes `plate`.
    pub fn from_candidates(bounds: Region, candidates: Vec<Candidate>, requested_topn: usize) -> Self {
        let (plate, confidence) = candidates.first()
            .map(|c| (c.plate.clone(), c.confidence))
            .unwrap_or_default();
        let Region { x, y, width, height } = bounds;
        let coordinates = [
            Point { x, y },
            Point { x: x + width, y },
            Point { x: x + width, y: y + height },
            Point { x, y: y + height },
        ];
        Self {
            plate,
            confidence,
            region: String::new(),
            region_confidence: 0,
            requested_topn,
            processing_time_ms: 0.0,
            coordinates,
            candidates,
        }
    }
}

/// Everything recognized in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Results {
    pub version: u32,
    pub data_type: String,
    pub epoch_time: u64,
    pub img_width: u32,
    pub img_height: u32,
    pub processing_time_ms: f32,
    pub regions_of_interest: Vec<Region>,
    pub results: Vec<PlateResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
}

impl Results {
    /// A frame that was not analyzed, or analyzed with nothing found.
    pub fn empty(img_width: u32, img_height: u32) -> Self {
        Self {
            version: RESULTS_VERSION,
            data_type: "alpr_results".to_string(),
            epoch_time: epoch_millis(),
            img_width,
            img_height,
            processing_time_ms: 0.0,
            regions_of_interest: Vec::new(),
            results: Vec::new(),
            identifier: None,
        }
    }

    pub fn has_plates(&self) -> bool {
        !self.results.is_empty()
    }
}

/// Serializes results as a single JSON line.
pub fn to_json(results: &Results) -> Result<String, LprError> {
    Ok(serde_json::to_string(results)?)
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Engine settings; the driver always runs with `detect_region` on and `debug` off.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub country: String,
    pub topn: usize,
    pub detect_region: bool,
    pub debug: bool,
    pub models: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            country: "us".to_string(),
            topn: 10,
            detect_region: true,
            debug: false,
            models: PathBuf::from("./models"),
        }
    }
}

pub trait Recognizer {
    /// Recognizes plates inside `regions` of `frame`. `regions` is never empty.
    fn recognize(&mut self, frame: &Frame, regions: &[Region]) -> Result<Results, LprError>;

    fn version(&self) -> String;
}

/// Loads the compiled-in recognition backend.
#[cfg(feature = "tensorflow-engine")]
pub fn load_engine(config: &EngineConfig) -> Result<Box<dyn Recognizer>, LprError> {
    let engine = crate::tensorflow_engine::TensorflowEngine::new(config.clone())?;
    Ok(Box::new(engine))
}

/// Loads the compiled-in recognition backend.
#[cfg(not(feature = "tensorflow-engine"))]
pub fn load_engine(config: &EngineConfig) -> Result<Box<dyn Recognizer>, LprError> {
    Err(crate::error::LprErrorKind::EngineLoad(format!(
        "no recognition backend compiled in for country '{}', rebuild with --features tensorflow-engine",
        config.country
    )).into())
}


#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn union_and_clamp() {
        let a = Region::new(10, 10, 20, 20);
        let b = Region::new(25, 5, 10, 10);
        assert_eq!(a.union(&b), Region::new(10, 5, 25, 25));
        assert_eq!(Region::default().union(&b), b);
        assert_eq!(Region::new(90, 90, 50, 50).clamp_to(100, 120), Region::new(90, 90, 10, 30));
    }

    #[test]
    fn empty_results_json() -> Result<(), LprError> {
        let json = to_json(&Results::empty(640, 480))?;
        assert!(!json.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&json)?;
        assert_eq!(value["data_type"], "alpr_results");
        assert_eq!(value["img_width"], 640);
        assert_eq!(value["results"].as_array().map(|r| r.len()), Some(0));
        assert!(value.get("identifier").is_none());
        Ok(())
    }

    #[test]
    fn plate_takes_best_candidate() {
        let candidates = vec![
            Candidate { plate: "ABC123".into(), confidence: 91.0 },
            Candidate { plate: "A8C123".into(), confidence: 80.5 },
        ];
        let plate = PlateResult::from_candidates(Region::new(5, 6, 100, 30), candidates, 10);
        assert_eq!(plate.plate, "ABC123");
        assert_eq!(plate.coordinates[2], Point { x: 105, y: 36 });
        assert_eq!(plate.candidates.len(), 2);
    }

    #[cfg(not(feature = "tensorflow-engine"))]
    #[test]
    fn missing_backend_is_fatal() {
        match load_engine(&EngineConfig::default()) {
            Err(err) => assert!(err.is_fatal()),
            Ok(_) => panic!("no backend should be available"),
        }
    }
}
