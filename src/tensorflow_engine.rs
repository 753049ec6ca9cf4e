//! Recognition backend running three frozen TensorFlow graphs: plate detection,
//! vertical fine mapping, and sequence OCR decoded greedily into candidates.
//!
//! Models are read from `<models>/<country>/{detect,fine_mapping,ocr}.pb`.

use tensorflow::{ Tensor, Session, SessionOptions, Graph, SessionRunArgs, ImportGraphDefOptions };
use image::{ GenericImageView, imageops::FilterType, DynamicImage };
use imageproc::{ filter, contrast };
use log::debug;

use std::fs::File;
use std::io::prelude::*;
use std::path::Path;
use std::time::Instant;

use crate::capture::Frame;
use crate::engine::{ Candidate, EngineConfig, PlateResult, Recognizer, Region, Results };
use crate::error::{ LprError, LprErrorKind };
use crate::utils;

// CHARS for Chinese license plate, the first 31 are provinces
const CHARS: [&str; 83] = ["京", "沪", "津", "渝", "冀", "晋", "蒙", "辽", "吉", "黑", "苏", "浙", "皖", "闽", "赣", "鲁", "豫", "鄂", "湘", "粤", "桂",
             "琼", "川", "贵", "云", "藏", "陕", "甘", "青", "宁", "新", "0", "1", "2", "3", "4", "5", "6", "7", "8", "9", "A",
             "B", "C", "D", "E", "F", "G", "H", "J", "K", "L", "M", "N", "P", "Q", "R", "S", "T", "U", "V", "W", "X",
             "Y", "Z","港","学","使","警","澳","挂","军","北","南","广","沈","兰","成","济","海","民","航","空"
             ];
const PROVINCES: usize = 31;
// ocr output: 18 time steps x 84 classes, the last class is blank
const OCR_SHAPE: [usize; 2] = [18, 84];
const SCORE_NEEDED: f32 = 0.6;
// how many uncertain positions are tried with their runner-up glyph
const ALTERNATIVE_POSITIONS: usize = 4;

pub struct TensorflowEngine {
    detection: LpDetect,
    ocr: LprPart,
    fine_mapping: LprPart,
    config: EngineConfig,
}

impl TensorflowEngine {

    pub fn new(config: EngineConfig) -> Result<Self, LprError> {
        let dir = config.models.join(&config.country);
        if !dir.is_dir() {
            return Err(LprErrorKind::EngineLoad(format!(
                "no models for country '{}' in {}", config.country, dir.display()
            )).into());
        }
        let load_error = |e: LprError| LprError::from(LprErrorKind::EngineLoad(e.to_string()));
        let ocr = LprPart::new(dir.join("ocr.pb"), "input_1", "dense_2/truediv").map_err(load_error)?;
        let fine_mapping = LprPart::new(dir.join("fine_mapping.pb"), "input_1", "relu4/Relu").map_err(load_error)?;
        let detection = LpDetect::new(dir.join("detect.pb"), "image_tensor", "detection_boxes", "detection_scores")
            .map_err(load_error)?;
        debug!("loaded models from {}", dir.display());
        Ok(TensorflowEngine { detection, ocr, fine_mapping, config })
    }

    /// Plates inside one region of interest, in frame coordinates.
    fn recognize_region(&self, img: &DynamicImage, roi: Region) -> Result<Vec<PlateResult>, LprError> {
        let roi = roi.clamp_to(img.width(), img.height());
        if roi.is_empty() {
            return Ok(Vec::new());
        }
        let crop = DynamicImage::ImageRgba8(img.view(roi.x, roi.y, roi.width, roi.height).to_image());

        let mut plates = Vec::new();
        for (a_box, score) in self.get_boxes_and_scores(&crop, SCORE_NEEDED)? {
            let started = Instant::now();
            let mut a_box = a_box;
            let [x, y, width, height] = a_box;
            if width == 0 || height == 0 {
                continue;
            }
            let plate = DynamicImage::ImageRgba8(crop.view(x, y, width, height).to_image());
            let plate = self.fine_mapping_vertical(&plate, &mut a_box)?;
            let ocr_res = self.ocr_probabilities(&plate)?;
            let candidates = decode_candidates(&ocr_res, OCR_SHAPE, self.config.topn);
            if candidates.is_empty() {
                continue;
            }
            debug!("plate box {:?} score {} -> {}", a_box, score, candidates[0].plate);

            let [x, y, width, height] = a_box;
            let bounds = Region::new(roi.x + x, roi.y + y, width, height);
            let mut result = PlateResult::from_candidates(bounds, candidates, self.config.topn);
            if self.config.detect_region {
                if let Some(province) = province_of(&result.plate) {
                    result.region = province.to_string();
                    result.region_confidence = (result.confidence.round() as u32).min(100);
                }
            }
            result.processing_time_ms = started.elapsed().as_secs_f32() * 1000.0;
            plates.push(result);
        }
        Ok(plates)
    }

    /// get boxes and scores
    /// box here is in a format of x,y,width,height
    /// the result which score is under score_needed will be dropped
    fn get_boxes_and_scores(&self, img: &DynamicImage, score_needed: f32) -> Result<Vec<([u32; 4], f32)>, LprError> {
        let (width, height) = img.dimensions();
        let img_data = img.to_rgb8().into_raw();
        let img_tensor = Tensor::new(&[1, height as u64, width as u64, 3]).with_values(&img_data)?;

        // box ymin xmin ymax xmax normalize 1
        let (boxes, scores) = self.detection.run(&img_tensor)?;
        let detect_res = boxes.chunks(4).zip(scores.iter()).filter(|(_, score)| {
            **score > score_needed
        }).map(|(v, score)| {
            let ymin = (v[0].clamp(0.0, 1.0)*(height as f32)) as u32;
            let xmin = (v[1].clamp(0.0, 1.0)*(width as f32)) as u32;
            let ymax = (v[2].clamp(0.0, 1.0)*(height as f32)) as u32;
            let xmax = (v[3].clamp(0.0, 1.0)*(width as f32)) as u32;
            let a_box = Region::new(xmin, ymin, xmax.saturating_sub(xmin), ymax.saturating_sub(ymin))
                .clamp_to(width, height);
            ([a_box.x, a_box.y, a_box.width, a_box.height], *score)
        }).collect();
        Ok(detect_res)
    }

    /// Per time step class probabilities of the OCR graph.
    fn ocr_probabilities(&self, img: &DynamicImage) -> Result<Vec<f32>, LprError> {
        let img = utils::equalize_hist_in_gray(img);

        // transpose
        let img = utils::transpose(&img);
        let img = img.resize_exact(48, 164, FilterType::Nearest);

        let img = img.to_luma8();
        let mut img = filter::gaussian_blur_f32(&img, 1.4);
        contrast::equalize_histogram_mut(&mut img);
        // gray to bgr, every channel the same
        let img: Vec<f32> = img.into_raw().into_iter().flat_map(|v| [v as f32; 3]).collect();
        let tensor_img: Tensor<f32> = Tensor::new(&[1, 164, 48u64, 3]).with_values(&img[..])?;

        let ocr_res = self.ocr.run(&tensor_img)?;
        Ok(ocr_res.to_vec())
    }

    // the graph predicts the left and right edge of the characters as a fraction of the width
    fn fine_mapping_vertical(&self, img: &DynamicImage, rect: &mut [u32; 4]) -> Result<DynamicImage, LprError> {
        let resized = img.resize_exact(66, 16, FilterType::Nearest).to_rgb8();
        let resized: Vec<f32> = resized.pixels()
            .flat_map(|p| [p[2], p[1], p[0]])
            .map(|v| v as f32/255.0)
            .collect();

        let tensor: Tensor<f32> = Tensor::new(&[1, 16u64, 66, 3]).with_values(&resized)?;
        let res_raw = self.fine_mapping.run(&tensor)?.to_vec();
        if res_raw.len() < 2 {
            return Ok(img.clone());
        }
        let (img_width, img_height) = img.dimensions();
        let res: Vec<u32> = res_raw.iter().map(|v| (v.max(0.0) * img_width as f32) as u32).collect();
        let h = res[0].checked_sub(3).unwrap_or(res[0]).min(img_width - 1);
        let t = (res[1] + 2).min(img_width - 1);
        if t <= h {
            return Ok(img.clone());
        }
        rect[2] = rect[2].saturating_sub((rect[2] as f32*(1.0 - res_raw[1] + res_raw[0])) as u32);
        rect[0] += h;

        Ok(DynamicImage::ImageRgba8(img.view(h, 0, t - h, img_height).to_image()))
    }
}

impl Recognizer for TensorflowEngine {
    fn recognize(&mut self, frame: &Frame, regions: &[Region]) -> Result<Results, LprError> {
        let started = Instant::now();
        let img = DynamicImage::ImageRgb8(frame.pixels().clone());
        let mut results = Results::empty(frame.width(), frame.height());
        for roi in regions {
            results.results.extend(self.recognize_region(&img, *roi)?);
        }
        results.regions_of_interest = regions.to_vec();
        results.processing_time_ms = started.elapsed().as_secs_f32() * 1000.0;
        Ok(results)
    }

    fn version(&self) -> String {
        format!("tensorflow {}", tensorflow::version().unwrap_or_default())
    }
}

/// Province glyph a plate starts with, if any.
fn province_of(plate: &str) -> Option<&'static str> {
    let first = plate.chars().next()?.to_string();
    CHARS[..PROVINCES].iter().copied().find(|c| *c == first)
}

/// Greedy CTC decoding of one label path; repeated labels collapse, blanks are dropped.
/// Confidence is the mean probability of the emitted characters, in percent.
fn decode_path(ocr_res: &[f32], classes: usize, path: &[usize]) -> Option<Candidate> {
    let (chars, total) = path.iter().enumerate().skip(1).filter(|(i, v)| {
        **v < CHARS.len() && **v != path[i-1]
    }).fold((Vec::new(), 0.0), |(mut chars, confidence), (i, v)| {
        chars.push(CHARS[*v]);
        (chars, confidence + ocr_res[i*classes + v])
    });
    if chars.is_empty() {
        return None;
    }
    let confidence = total/chars.len() as f32 * 100.0;
    Some(Candidate { plate: chars.join(""), confidence })
}

/// Best path first, then the paths that swap the least certain time steps for their
/// runner-up class, deduplicated and ordered by confidence, at most `topn`.
fn decode_candidates(ocr_res: &[f32], shape: [usize; 2], topn: usize) -> Vec<Candidate> {
    let classes = shape[1];
    let best = utils::argmax_in_axis0(ocr_res, &shape);
    let runner_up: Vec<usize> = ocr_res.chunks(classes).zip(best.iter()).map(|(row, b)| {
        row.iter().enumerate()
            .filter(|(i, _)| i != b)
            .fold((0, f32::MIN), |acc, (i, v)| if *v > acc.1 { (i, *v) } else { acc })
            .0
    }).collect();

    let mut uncertain: Vec<usize> = (0..best.len()).collect();
    uncertain.sort_by(|a, b| {
        let pa = ocr_res[a*classes + best[*a]];
        let pb = ocr_res[b*classes + best[*b]];
        pa.partial_cmp(&pb).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut candidates: Vec<Candidate> = Vec::new();
    let mut push = |candidate: Option<Candidate>| {
        if let Some(candidate) = candidate {
            if !candidates.iter().any(|c| c.plate == candidate.plate) {
                candidates.push(candidate);
            }
        }
    };
    push(decode_path(ocr_res, classes, &best));
    for step in uncertain.into_iter().take(ALTERNATIVE_POSITIONS) {
        let mut path = best.clone();
        path[step] = runner_up[step];
        push(decode_path(ocr_res, classes, &path));
    }

    // the best path stays first
    if candidates.len() > 1 {
        candidates[1..].sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
    }
    candidates.truncate(topn.max(1));
    candidates
}

struct LpDetect {
    graph: Graph,
    session: Session,
    input_name: &'static str,
    box_name: &'static str,
    scores_name: &'static str,
}

impl LpDetect {

    fn new(pb_file: impl AsRef<Path>, input_name: &'static str, box_name: &'static str, scores_name: &'static str) -> Result<Self, LprError> {
        let (graph, session) = load_graph(pb_file)?;
        Ok(Self { graph, session, input_name, box_name, scores_name })
    }

    /// get detection result
    /// return (boxes, scores)
    fn run(&self, input: &Tensor<u8>) -> Result<(Tensor<f32>, Tensor<f32>), LprError> {
        let graph = &self.graph;
        let mut args = SessionRunArgs::new();
        args.add_feed(&graph.operation_by_name_required(self.input_name)?, 0, input);
        let box_token = args.request_fetch(&graph.operation_by_name_required(self.box_name)?, 0);
        let scores_token = args.request_fetch(&graph.operation_by_name_required(self.scores_name)?, 0);
        self.session.run(&mut args)?;
        let boxes: Tensor<f32> = args.fetch(box_token)?;
        let scores: Tensor<f32> = args.fetch(scores_token)?;
        Ok((boxes, scores))
    }
}

struct LprPart {
    graph: Graph,
    session: Session,
    input_name: &'static str,
    output_name: &'static str,
}

impl LprPart {

    fn new(pb_file: impl AsRef<Path>, input_name: &'static str, output_name: &'static str) -> Result<Self, LprError> {
        let (graph, session) = load_graph(pb_file)?;
        Ok(Self { graph, session, input_name, output_name })
    }

    fn run(&self, input: &Tensor<f32>) -> Result<Tensor<f32>, LprError> {
        let graph = &self.graph;
        let mut args = SessionRunArgs::new();
        args.add_feed(&graph.operation_by_name_required(self.input_name)?, 0, input);
        let res = args.request_fetch(&graph.operation_by_name_required(self.output_name)?, 0);
        self.session.run(&mut args)?;
        let res: Tensor<f32> = args.fetch(res)?;
        Ok(res)
    }
}

fn load_graph(pb_file: impl AsRef<Path>) -> Result<(Graph, Session), LprError> {
    let pb_path = pb_file.as_ref();
    let mut pb_file = File::open(pb_path)
        .map_err(|e| LprError::io(format!("error opening model {}", pb_path.display()), e))?;
    let mut pb = Vec::new();
    pb_file.read_to_end(&mut pb)
        .map_err(|e| LprError::io(format!("error reading model {}", pb_path.display()), e))?;
    // import graph def
    let mut graph = Graph::new();
    graph.import_graph_def(&pb, &ImportGraphDefOptions::new())?;
    // new session
    let session = Session::new(&SessionOptions::new(), &graph)?;
    Ok((graph, session))
}
