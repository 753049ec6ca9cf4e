use clap::error::ErrorKind;
use clap::{ value_parser, Arg, ArgAction, ArgMatches, Command };

use std::ffi::OsString;
use std::path::PathBuf;

use crate::engine::EngineConfig;
use crate::error::{ LprError, LprErrorKind };
use crate::session::{ SessionSettings, DEFAULT_SCRATCH_DIR, DEFAULT_SNAPSHOT };

/// Everything one run needs, parsed from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub inputs: Vec<String>,
    pub engine: EngineConfig,
    pub session: SessionSettings,
    pub verbose: bool,
}

pub fn command() -> Command {
    Command::new("lpr-driver")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Recognizes license plates in images, videos and webcam streams, one JSON line per frame")
        .arg(Arg::new("INPUT")
            .help("Image, video, directory of images, `webcam` or /dev/video<N>")
            .value_name("image_file_path")
            .required(true)
            .num_args(1..))
        .arg(Arg::new("country")
            .short('c')
            .long("country")
            .value_name("country_code")
            .help("Country code to identify (Ex: 'us' for USA or 'eu' for Europe)")
            .default_value("us"))
        .arg(Arg::new("topn")
            .short('n')
            .long("topn")
            .value_name("topN")
            .help("Max number of possible plate numbers to return")
            .value_parser(value_parser!(usize))
            .default_value("10"))
        .arg(Arg::new("motion")
            .long("motion")
            .help("Use motion detection on video file or stream")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("save_frames")
            .short('s')
            .long("save_frames")
            .help("Save each analyzed frame to the scratch directory under its result identifier")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("models")
            .long("models")
            .value_name("dir")
            .help("Directory holding the recognition models")
            .value_parser(value_parser!(PathBuf))
            .default_value("./models"))
        .arg(Arg::new("scratch_dir")
            .long("scratch-dir")
            .value_name("dir")
            .help("Where saved frames go, files older than 10 seconds are deleted")
            .value_parser(value_parser!(PathBuf))
            .default_value(DEFAULT_SCRATCH_DIR))
        .arg(Arg::new("snapshot")
            .long("snapshot")
            .value_name("path")
            .help("Latest analyzed frame, overwritten every frame")
            .value_parser(value_parser!(PathBuf))
            .default_value(DEFAULT_SNAPSHOT))
        .arg(Arg::new("seek")
            .long("seek")
            .value_name("ms")
            .help("Start video files at this offset")
            .value_parser(value_parser!(u64))
            .default_value("0"))
        .arg(Arg::new("verbose")
            .short('v')
            .long("verbose")
            .help("Enable debug logging on stderr")
            .action(ArgAction::SetTrue))
}

pub fn parse<I, T>(args: I) -> Result<Options, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = command().try_get_matches_from(args)?;
    Ok(options_from(&matches))
}

fn options_from(matches: &ArgMatches) -> Options {
    let defaults = SessionSettings::default();
    let engine_defaults = EngineConfig::default();

    let inputs = matches.get_many::<String>("INPUT")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let engine = EngineConfig {
        country: matches.get_one::<String>("country").cloned().unwrap_or(engine_defaults.country),
        topn: matches.get_one::<usize>("topn").copied().unwrap_or(engine_defaults.topn),
        models: matches.get_one::<PathBuf>("models").cloned().unwrap_or(engine_defaults.models),
        ..engine_defaults
    };
    let session = SessionSettings {
        motion: matches.get_flag("motion"),
        save_frames: matches.get_flag("save_frames"),
        scratch_dir: matches.get_one::<PathBuf>("scratch_dir").cloned().unwrap_or(defaults.scratch_dir),
        snapshot: matches.get_one::<PathBuf>("snapshot").cloned().unwrap_or(defaults.snapshot),
        seek_ms: matches.get_one::<u64>("seek").copied().unwrap_or(defaults.seek_ms),
    };
    Options { inputs, engine, session, verbose: matches.get_flag("verbose") }
}

/// `--help` and `--version` end the run successfully.
pub fn is_informational(error: &clap::Error) -> bool {
    matches!(error.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion)
}

/// First line of clap's message, without the `error: ` lead.
pub fn cli_error(error: &clap::Error) -> LprError {
    let rendered = error.to_string();
    let line = rendered.lines().next().unwrap_or("invalid arguments");
    let line = line.strip_prefix("error: ").unwrap_or(line);
    LprErrorKind::Cli(line.trim().to_string()).into()
}


#[cfg(test)]
mod test {

    use std::error::Error;

    use super::*;

    #[test]
    fn defaults() -> Result<(), Box<dyn Error>> {
        let options = parse(["lpr-driver", "car.jpg"])?;
        assert_eq!(options.inputs, vec!["car.jpg"]);
        assert_eq!(options.engine.country, "us");
        assert_eq!(options.engine.topn, 10);
        assert!(options.engine.detect_region);
        assert!(!options.engine.debug);
        assert_eq!(options.session, SessionSettings::default());
        assert!(!options.verbose);
        Ok(())
    }

    #[test]
    fn flags() -> Result<(), Box<dyn Error>> {
        let options = parse([
            "lpr-driver", "-c", "eu", "-n", "3", "--motion", "-s", "--seek", "2500",
            "--scratch-dir", "/tmp/frames", "webcam", "/dev/video1", "clip.mp4",
        ])?;
        assert_eq!(options.inputs, vec!["webcam", "/dev/video1", "clip.mp4"]);
        assert_eq!(options.engine.country, "eu");
        assert_eq!(options.engine.topn, 3);
        assert!(options.session.motion);
        assert!(options.session.save_frames);
        assert_eq!(options.session.seek_ms, 2500);
        assert_eq!(options.session.scratch_dir, PathBuf::from("/tmp/frames"));
        Ok(())
    }

    #[test]
    fn failures() {
        let err = parse(["lpr-driver"]).err();
        assert!(matches!(&err, Some(e) if !is_informational(e)));

        let err = match parse(["lpr-driver", "-n", "many", "car.jpg"]) {
            Err(e) => e,
            Ok(_) => panic!("topn must be a number"),
        };
        assert!(!is_informational(&err));
        let lpr_err = cli_error(&err);
        assert!(lpr_err.is_fatal());
        assert!(!lpr_err.to_string().starts_with("error: "));

        let help = parse(["lpr-driver", "--help"]).err();
        assert!(matches!(&help, Some(e) if is_informational(e)));
    }
}
