//! Frame sources: still images decoded with `image`, video files and webcams
//! decoded by an `ffmpeg` child process writing raw `rgb24` frames to a pipe.

use image::RgbImage;
use log::{ debug, warn };
use serde::Deserialize;

use std::io::{ ErrorKind, Read };
use std::path::{ Path, PathBuf };
use std::process::{ Child, ChildStdout, Command, Stdio };

use crate::error::{ LprError, LprErrorKind };

/// A decoded RGB8 frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pixels: RgbImage,
}

impl Frame {
    pub fn new(pixels: RgbImage) -> Self {
        Self { pixels }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, LprError> {
        Ok(Self::new(image::open(path)?.to_rgb8()))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Bytes per pixel.
    pub fn elem_size(&self) -> usize {
        3
    }

    pub fn as_raw(&self) -> &[u8] {
        self.pixels.as_raw()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    /// Writes the frame, the format follows the extension (`.jpg` for snapshots).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), LprError> {
        Ok(self.pixels.save(path)?)
    }
}

pub trait FrameSource {
    /// Blocks until the next frame is available, `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, LprError>;
}

/// A single image, yielded once.
pub struct StillImage {
    frame: Option<Frame>,
}

impl StillImage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LprError> {
        Ok(Self { frame: Some(Frame::open(path)?) })
    }
}

impl FrameSource for StillImage {
    fn next_frame(&mut self) -> Result<Option<Frame>, LprError> {
        Ok(self.frame.take())
    }
}

#[derive(Debug, Deserialize)]
struct Probe {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

/// Extracts the first video stream's dimensions from `ffprobe -of json` output.
fn parse_probe(output: &[u8]) -> Result<(u32, u32), LprError> {
    let probe: Probe = serde_json::from_slice(output)?;
    probe.streams.iter()
        .find_map(|s| match (s.width, s.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        })
        .ok_or_else(|| LprErrorKind::Capture("no video stream found".to_string()).into())
}

/// Where the capture reads from.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureInput {
    File { path: PathBuf, seek_ms: u64 },
    Webcam(u32),
}

impl CaptureInput {
    /// Input arguments for `ffmpeg`, or for `ffprobe` with `seek` off (it has no `-ss`).
    fn input_args(&self, seek: bool) -> Vec<String> {
        match self {
            CaptureInput::File { path, seek_ms } => {
                let mut args = Vec::new();
                if seek && *seek_ms > 0 {
                    args.push("-ss".to_string());
                    args.push(format!("{}ms", seek_ms));
                }
                args.push("-i".to_string());
                args.push(path.display().to_string());
                args
            }
            CaptureInput::Webcam(index) => vec![
                "-f".to_string(),
                "video4linux2".to_string(),
                "-i".to_string(),
                format!("/dev/video{}", index),
            ],
        }
    }

    fn open_error(&self, reason: String) -> LprError {
        match self {
            CaptureInput::Webcam(index) => {
                warn!("webcam /dev/video{} unavailable: {}", index, reason);
                LprErrorKind::WebcamOpen(*index).into()
            }
            CaptureInput::File { path, .. } => {
                LprErrorKind::Capture(format!("{}: {}", path.display(), reason)).into()
            }
        }
    }
}

/// Video file or webcam decoded by `ffmpeg`.
pub struct FfmpegCapture {
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
}

impl FfmpegCapture {
    pub fn open(input: CaptureInput) -> Result<Self, LprError> {
        let (width, height) = Self::probe(&input)?;
        debug!("capture {:?} is {}x{}", input, width, height);

        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .args(input.input_args(true))
            .arg("-an")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-f")
            .arg("rawvideo")
            .arg("-");
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|e| input.open_error(format!("spawning ffmpeg: {}", e)))?;
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(input.open_error("failed to capture ffmpeg stdout".to_string()));
            }
        };
        Ok(Self { child, stdout, width, height })
    }

    fn probe(input: &CaptureInput) -> Result<(u32, u32), LprError> {
        let output = Command::new("ffprobe")
            .arg("-v")
            .arg("error")
            .arg("-select_streams")
            .arg("v:0")
            .arg("-show_entries")
            .arg("stream=width,height")
            .arg("-of")
            .arg("json")
            .args(input.input_args(false))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| input.open_error(format!("running ffprobe: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(input.open_error(stderr.trim().to_string()));
        }
        parse_probe(&output.stdout).map_err(|e| input.open_error(e.to_string()))
    }
}

impl FrameSource for FfmpegCapture {
    fn next_frame(&mut self) -> Result<Option<Frame>, LprError> {
        let mut buffer = vec![0u8; self.width as usize * self.height as usize * 3];
        match read_frame(&mut self.stdout, &mut buffer) {
            Ok(true) => {}
            Ok(false) => return Ok(None),
            Err(e) => return Err(LprError::io("error reading frame from ffmpeg", e)),
        }
        RgbImage::from_raw(self.width, self.height, buffer)
            .map(|pixels| Some(Frame::new(pixels)))
            .ok_or_else(|| LprErrorKind::Capture("short frame buffer".to_string()).into())
    }
}

impl Drop for FfmpegCapture {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Fills `buffer` with one frame; `Ok(false)` on a clean or truncated end of stream.
fn read_frame(reader: &mut impl Read, buffer: &mut [u8]) -> std::io::Result<bool> {
    match reader.read_exact(buffer) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}
