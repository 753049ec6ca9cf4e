//! Per-frame analysis.
//!
//! A [`Session`] owns everything the analysis step needs: the engine, the motion
//! detector (when gating is on), the output channel and the flag that ends the run.

use log::{ debug, warn };

use std::fs;
use std::io::Write;
use std::path::{ Path, PathBuf };
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;
use std::time::Instant;

use crate::capture::Frame;
use crate::engine::{ Recognizer, Region, Results };
use crate::error::LprError;
use crate::janitor::{ self, SCRATCH_MAX_AGE };
use crate::motion::{ FrameDifference, MotionDetect };
use crate::report::Reporter;
use crate::utils::random_identifier;

pub const DEFAULT_SCRATCH_DIR: &str = "/dev/shm/phantomalpr";
pub const DEFAULT_SNAPSHOT: &str = "/dev/shm/phantom-webcam.jpg";
pub const IDENTIFIER_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Only analyze the part of the frame that moved
    pub motion: bool,
    /// Keep a copy of every analyzed frame in `scratch_dir`
    pub save_frames: bool,
    pub scratch_dir: PathBuf,
    /// Latest analyzed frame, overwritten every time
    pub snapshot: PathBuf,
    /// Start offset for video files
    pub seek_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            motion: false,
            save_frames: false,
            scratch_dir: PathBuf::from(DEFAULT_SCRATCH_DIR),
            snapshot: PathBuf::from(DEFAULT_SNAPSHOT),
            seek_ms: 0,
        }
    }
}

pub struct Session<O: Write, E: Write> {
    engine: Box<dyn Recognizer>,
    motion: Option<Box<dyn MotionDetect>>,
    settings: SessionSettings,
    reporter: Reporter<O, E>,
    active: Arc<AtomicBool>,
}

impl<O: Write, E: Write> Session<O, E> {
    pub fn new(engine: Box<dyn Recognizer>, settings: SessionSettings, reporter: Reporter<O, E>) -> Self {
        let motion: Option<Box<dyn MotionDetect>> = if settings.motion {
            Some(Box::new(FrameDifference::default()))
        } else {
            None
        };
        Self { engine, motion, settings, reporter, active: Arc::new(AtomicBool::new(true)) }
    }

    /// Replaces the motion detector; only used when motion gating is on.
    pub fn with_motion_detector(mut self, detector: Box<dyn MotionDetect>) -> Self {
        if self.settings.motion {
            self.motion = Some(detector);
        }
        self
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Creates the scratch directory when frames are saved. Failures are reported, not fatal.
    pub fn prepare(&mut self) {
        if !self.settings.save_frames {
            return;
        }
        if let Err(e) = create_scratch_dir(&self.settings.scratch_dir) {
            self.reporter.error(&e);
        }
    }

    /// Cleared to stop the run at the next frame boundary.
    pub fn active_flag(&self) -> Arc<AtomicBool> {
        self.active.clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn report_error(&mut self, error: &LprError) {
        self.reporter.error(error);
    }

    /// Starts a new stream: `frame` becomes the motion reference.
    pub fn reset_motion(&mut self, frame: &Frame) {
        if let Some(motion) = self.motion.as_mut() {
            motion.reset(frame);
        }
    }

    /// Drops the motion reference, so the next frame counts as moved everywhere.
    pub fn clear_motion(&mut self) {
        if let Some(motion) = self.motion.as_mut() {
            motion.clear();
        }
    }

    fn regions_of_interest(&mut self, frame: &Frame) -> Vec<Region> {
        match self.motion.as_mut() {
            Some(motion) => {
                let region = motion.detect(frame).clamp_to(frame.width(), frame.height());
                if region.is_empty() {
                    Vec::new()
                } else {
                    vec![region]
                }
            }
            None => vec![Region::full(frame.width(), frame.height())],
        }
    }

    /// Analyzes one frame and prints its result line. Returns whether a plate was found.
    pub fn analyze(&mut self, frame: &Frame) -> Result<bool, LprError> {
        let started = Instant::now();
        let regions = self.regions_of_interest(frame);

        let mut results = if regions.is_empty() {
            debug!("no motion, frame skipped");
            Results::empty(frame.width(), frame.height())
        } else {
            if self.settings.save_frames {
                let swept = janitor::sweep(&self.settings.scratch_dir, SCRATCH_MAX_AGE);
                for e in &swept.errors {
                    self.reporter.error(e);
                }
            }

            let mut results = match self.engine.recognize(frame, &regions) {
                Ok(results) => results,
                Err(e) => {
                    // the frame still gets its line
                    self.reporter.error(&e);
                    let mut results = Results::empty(frame.width(), frame.height());
                    results.regions_of_interest = regions;
                    results.processing_time_ms = started.elapsed().as_secs_f32() * 1000.0;
                    self.reporter.results(&results)?;
                    return Ok(false);
                }
            };
            results.regions_of_interest = regions;

            let identifier = random_identifier(IDENTIFIER_LEN);
            if let Err(e) = frame.save(&self.settings.snapshot) {
                self.reporter.error(&e);
            }
            if self.settings.save_frames {
                let path = self.settings.scratch_dir.join(format!("{}.jpg", identifier));
                if let Err(e) = frame.save(&path) {
                    self.reporter.error(&e);
                }
            }
            results.identifier = Some(identifier);
            results
        };

        results.processing_time_ms = started.elapsed().as_secs_f32() * 1000.0;
        self.reporter.results(&results)?;
        Ok(results.has_plates())
    }

    pub fn into_reporter(self) -> Reporter<O, E> {
        self.reporter
    }
}

fn create_scratch_dir(dir: &Path) -> Result<(), LprError> {
    fs::create_dir_all(dir)
        .map_err(|e| LprError::io(format!("error creating directory {}", dir.display()), e))?;
    // shared with whatever consumes the snapshots
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o777)) {
            warn!("could not open up permissions on {}: {}", dir.display(), e);
        }
    }
    Ok(())
}


#[cfg(test)]
pub(crate) mod test {

    use image::{ Rgb, RgbImage };

    use std::cell::RefCell;
    use std::error::Error;
    use std::fs::File;
    use std::rc::Rc;
    use std::time::{ Duration, SystemTime };

    use crate::engine::{ Candidate, PlateResult };
    use crate::error::LprErrorKind;

    use super::*;

    /// Engine double: records the regions it was asked about, finds `plate` in each.
    pub(crate) struct FakeEngine {
        pub plate: Option<String>,
        pub calls: Rc<RefCell<Vec<Vec<Region>>>>,
    }

    impl FakeEngine {
        pub(crate) fn finding(plate: Option<&str>) -> (Self, Rc<RefCell<Vec<Vec<Region>>>>) {
            let calls = Rc::new(RefCell::new(Vec::new()));
            (Self { plate: plate.map(str::to_string), calls: calls.clone() }, calls)
        }
    }

    impl Recognizer for FakeEngine {
        fn recognize(&mut self, frame: &Frame, regions: &[Region]) -> Result<Results, LprError> {
            self.calls.borrow_mut().push(regions.to_vec());
            let mut results = Results::empty(frame.width(), frame.height());
            if let Some(plate) = &self.plate {
                for region in regions {
                    let candidates = vec![Candidate { plate: plate.clone(), confidence: 90.0 }];
                    results.results.push(PlateResult::from_candidates(*region, candidates, 10));
                }
            }
            Ok(results)
        }

        fn version(&self) -> String {
            "fake".to_string()
        }
    }

    struct BrokenEngine;

    impl Recognizer for BrokenEngine {
        fn recognize(&mut self, _frame: &Frame, _regions: &[Region]) -> Result<Results, LprError> {
            Err(LprErrorKind::Tensorflow("session run failed".to_string()).into())
        }

        fn version(&self) -> String {
            "broken".to_string()
        }
    }

    /// Motion double returning a fixed region.
    pub(crate) struct FixedMotion(pub Region);

    impl MotionDetect for FixedMotion {
        fn reset(&mut self, _frame: &Frame) {}

        fn clear(&mut self) {}

        fn detect(&mut self, _frame: &Frame) -> Region {
            self.0
        }
    }

    pub(crate) fn settings_in(dir: &Path) -> SessionSettings {
        SessionSettings {
            scratch_dir: dir.join("scratch"),
            snapshot: dir.join("latest.jpg"),
            ..SessionSettings::default()
        }
    }

    pub(crate) fn frame() -> Frame {
        Frame::new(RgbImage::from_pixel(64, 48, Rgb([90, 90, 90])))
    }

    fn result_lines(out: &[u8]) -> Result<Vec<serde_json::Value>, Box<dyn Error>> {
        let mut lines = Vec::new();
        for line in std::str::from_utf8(out)?.lines() {
            lines.push(serde_json::from_str(line)?);
        }
        Ok(lines)
    }

    #[test]
    fn full_frame_without_motion() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let (engine, calls) = FakeEngine::finding(Some("ABC123"));
        let reporter = Reporter::new(Vec::new(), Vec::new());
        let mut session = Session::new(Box::new(engine), settings_in(dir.path()), reporter);

        assert!(session.analyze(&frame())?);
        assert_eq!(*calls.borrow(), vec![vec![Region::full(64, 48)]]);
        assert!(dir.path().join("latest.jpg").exists());
        // frame saving off: no scratch dir
        assert!(!dir.path().join("scratch").exists());

        let (out, err) = session.into_reporter().into_inner();
        assert!(err.is_empty());
        let lines = result_lines(&out)?;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["results"][0]["plate"], "ABC123");
        let id = lines[0]["identifier"].as_str().ok_or("identifier")?;
        assert_eq!(id.len(), IDENTIFIER_LEN);
        Ok(())
    }

    #[test]
    fn no_motion_skips_recognition_but_prints() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let (engine, calls) = FakeEngine::finding(Some("ABC123"));
        let settings = SessionSettings { motion: true, ..settings_in(dir.path()) };
        let mut session = Session::new(Box::new(engine), settings, Reporter::new(Vec::new(), Vec::new()))
            .with_motion_detector(Box::new(FixedMotion(Region::default())));

        assert!(!session.analyze(&frame())?);
        assert!(calls.borrow().is_empty());
        assert!(!dir.path().join("latest.jpg").exists());

        let (out, _) = session.into_reporter().into_inner();
        let lines = result_lines(&out)?;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["results"].as_array().map(|r| r.len()), Some(0));
        assert!(lines[0].get("identifier").is_none());
        Ok(())
    }

    #[test]
    fn motion_region_is_the_only_roi() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let (engine, calls) = FakeEngine::finding(None);
        let settings = SessionSettings { motion: true, ..settings_in(dir.path()) };
        let mut session = Session::new(Box::new(engine), settings, Reporter::new(Vec::new(), Vec::new()))
            .with_motion_detector(Box::new(FixedMotion(Region::new(10, 10, 100, 20))));

        assert!(!session.analyze(&frame())?);
        // clipped to the 64x48 frame
        assert_eq!(*calls.borrow(), vec![vec![Region::new(10, 10, 54, 20)]]);
        Ok(())
    }

    #[test]
    fn saved_frames_are_named_by_identifier() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let (engine, _) = FakeEngine::finding(None);
        let settings = SessionSettings { save_frames: true, ..settings_in(dir.path()) };
        let mut session = Session::new(Box::new(engine), settings, Reporter::new(Vec::new(), Vec::new()));
        session.prepare();

        session.analyze(&frame())?;
        session.analyze(&frame())?;

        let (out, err) = session.into_reporter().into_inner();
        assert!(err.is_empty(), "{}", String::from_utf8_lossy(&err));
        for line in result_lines(&out)? {
            let id = line["identifier"].as_str().ok_or("identifier")?;
            assert!(dir.path().join("scratch").join(format!("{}.jpg", id)).exists());
        }
        Ok(())
    }

    #[test]
    fn unwritable_snapshot_is_not_fatal() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let (engine, _) = FakeEngine::finding(Some("XYZ"));
        let settings = SessionSettings {
            snapshot: dir.path().join("missing").join("latest.jpg"),
            ..settings_in(dir.path())
        };
        let mut session = Session::new(Box::new(engine), settings, Reporter::new(Vec::new(), Vec::new()));

        assert!(session.analyze(&frame())?);
        let (out, err) = session.into_reporter().into_inner();
        assert_eq!(result_lines(&out)?.len(), 1);
        let err: serde_json::Value = serde_json::from_slice(&err)?;
        assert!(err["error"].is_string());
        Ok(())
    }

    #[test]
    fn engine_failure_still_prints_a_line() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let mut session = Session::new(Box::new(BrokenEngine), settings_in(dir.path()), Reporter::new(Vec::new(), Vec::new()));

        assert!(!session.analyze(&frame())?);
        assert!(!session.analyze(&frame())?);

        let (out, err) = session.into_reporter().into_inner();
        let lines = result_lines(&out)?;
        assert_eq!(lines.len(), 2);
        for line in &lines {
            assert_eq!(line["results"].as_array().map(|r| r.len()), Some(0));
            assert_eq!(line["regions_of_interest"][0]["width"], 64);
            assert!(line.get("identifier").is_none());
        }
        assert_eq!(String::from_utf8(err)?.lines().count(), 2);
        Ok(())
    }

    #[test]
    fn stale_scratch_files_are_swept() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let (engine, _) = FakeEngine::finding(None);
        let settings = SessionSettings { save_frames: true, ..settings_in(dir.path()) };
        let mut session = Session::new(Box::new(engine), settings, Reporter::new(Vec::new(), Vec::new()));
        session.prepare();

        let stale = dir.path().join("scratch").join("stale.jpg");
        let file = File::create(&stale)?;
        file.set_modified(SystemTime::now() - Duration::from_secs(60))?;
        drop(file);

        session.analyze(&frame())?;

        assert!(!stale.exists());
        let (out, _) = session.into_reporter().into_inner();
        let lines = result_lines(&out)?;
        let id = lines[0]["identifier"].as_str().ok_or("identifier")?;
        assert!(dir.path().join("scratch").join(format!("{}.jpg", id)).exists());
        Ok(())
    }

    #[test]
    fn region_outside_the_frame_is_no_motion() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let (engine, calls) = FakeEngine::finding(Some("ABC123"));
        let settings = SessionSettings { motion: true, ..settings_in(dir.path()) };
        let mut session = Session::new(Box::new(engine), settings, Reporter::new(Vec::new(), Vec::new()))
            .with_motion_detector(Box::new(FixedMotion(Region::new(70, 10, 5, 5))));

        assert!(!session.analyze(&frame())?);
        assert!(calls.borrow().is_empty());
        Ok(())
    }
}
