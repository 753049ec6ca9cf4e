use log::{ debug, info };

use std::fs;
use std::io::Write;
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::capture::{ CaptureInput, FfmpegCapture, Frame, FrameSource, StillImage };
use crate::error::{ LprError, LprErrorKind };
use crate::input::{ classify, is_supported_image, InputKind };
use crate::session::Session;

/// Pause between webcam frames.
pub const WEBCAM_FRAME_DELAY: Duration = Duration::from_millis(10);
/// Pause between video file frames.
pub const VIDEO_FRAME_DELAY: Duration = Duration::from_millis(1);

/// Runs every input in order. Returns the first fatal error; everything else
/// is reported through the session and the run moves on.
pub fn run<O: Write, E: Write>(session: &mut Session<O, E>, inputs: &[String]) -> Result<(), LprError> {
    for input in inputs {
        if !session.is_active() {
            info!("stopping before {}", input);
            break;
        }
        let kind = classify(input);
        debug!("{} classified as {:?}", input, kind);
        match kind {
            InputKind::Webcam(index) => {
                let mut capture = FfmpegCapture::open(CaptureInput::Webcam(index))?;
                let frames = stream(session, &mut capture, WEBCAM_FRAME_DELAY)?;
                info!("webcam /dev/video{} closed after {} frames", index, frames);
            }
            InputKind::Video(path) => {
                if !path.is_file() {
                    session.report_error(&LprError::from(LprErrorKind::FileNotFound { what: "Video", path }));
                    continue;
                }
                let seek_ms = session.settings().seek_ms;
                match FfmpegCapture::open(CaptureInput::File { path: path.clone(), seek_ms }) {
                    Ok(mut capture) => {
                        let frames = stream(session, &mut capture, VIDEO_FRAME_DELAY)?;
                        info!("{} done after {} frames", path.display(), frames);
                    }
                    Err(e) => session.report_error(&e),
                }
            }
            InputKind::Image(path) => analyze_image(session, &path)?,
            InputKind::Directory(dir) => analyze_directory(session, &dir)?,
            InputKind::Unsupported(spec) => return Err(LprErrorKind::UnsupportedInput(spec).into()),
        }
    }
    Ok(())
}

/// Analyzes frames until the source ends or the session is stopped.
/// The first frame becomes the motion reference. Returns the number of frames read.
pub fn stream<O: Write, E: Write>(
    session: &mut Session<O, E>,
    source: &mut impl FrameSource,
    delay: Duration,
) -> Result<u64, LprError> {
    let mut framenum = 0;
    while session.is_active() {
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                session.report_error(&e);
                break;
            }
        };
        if framenum == 0 {
            session.reset_motion(&frame);
        }
        analyze_or_report(session, &frame)?;
        framenum += 1;
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
    Ok(framenum)
}

fn analyze_or_report<O: Write, E: Write>(session: &mut Session<O, E>, frame: &Frame) -> Result<(), LprError> {
    match session.analyze(frame) {
        Ok(found) => {
            debug!("plate found: {}", found);
            Ok(())
        }
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            session.report_error(&e);
            Ok(())
        }
    }
}

fn analyze_image<O: Write, E: Write>(session: &mut Session<O, E>, path: &Path) -> Result<(), LprError> {
    if !path.is_file() {
        session.report_error(&LprError::from(LprErrorKind::FileNotFound { what: "Image", path: path.to_path_buf() }));
        return Ok(());
    }
    let mut still = match StillImage::open(path) {
        Ok(still) => still,
        Err(e) => {
            session.report_error(&e);
            return Ok(());
        }
    };
    if let Some(frame) = still.next_frame()? {
        // stills are unrelated to whatever came before
        session.clear_motion();
        analyze_or_report(session, &frame)?;
    }
    Ok(())
}

/// Analyzes each supported image directly inside `dir`, in name order.
fn analyze_directory<O: Write, E: Write>(session: &mut Session<O, E>, dir: &Path) -> Result<(), LprError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            session.report_error(&LprError::io(format!("error opening directory {}", dir.display()), e));
            return Ok(());
        }
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| is_supported_image(name))
        .collect();
    names.sort();

    for name in names {
        if !session.is_active() {
            break;
        }
        let path = dir.join(&name);
        info!("{}", path.display());
        analyze_image(session, &path)?;
    }
    Ok(())
}
