//! Drives license plate recognition over still images, directories of images,
//! video files and webcams, printing one JSON result line per analyzed frame.

pub mod capture;
pub mod cli;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod input;
pub mod janitor;
pub mod motion;
pub mod report;
pub mod session;
pub mod utils;
#[cfg(feature = "tensorflow-engine")]
pub mod tensorflow_engine;

pub use capture::Frame;
pub use engine::{ load_engine, EngineConfig, Recognizer, Region, Results };
pub use error::{ LprError, LprErrorKind };
pub use session::{ Session, SessionSettings };
