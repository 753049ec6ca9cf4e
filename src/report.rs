use log::warn;

use std::io::{ self, Stderr, Stdout, Write };

use crate::engine::{ to_json, Results };
use crate::error::LprError;

/// Output channel: one JSON result line per analyzed frame on `out`,
/// one `{"error": ..., "kind": ...}` line per reported error on `err`.
pub struct Reporter<O: Write, E: Write> {
    out: O,
    err: E,
}

impl Reporter<Stdout, Stderr> {
    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }
}

impl<O: Write, E: Write> Reporter<O, E> {
    pub fn new(out: O, err: E) -> Self {
        Self { out, err }
    }

    pub fn results(&mut self, results: &Results) -> Result<(), LprError> {
        let line = to_json(results)?;
        writeln!(self.out, "{}", line).map_err(|e| LprError::io("error writing results", e))?;
        self.out.flush().map_err(|e| LprError::io("error writing results", e))
    }

    /// Best effort, a failing error channel is only logged.
    pub fn error(&mut self, error: &LprError) {
        let line = match serde_json::to_string(&error.report()) {
            Ok(line) => line,
            Err(e) => {
                warn!("unserializable error {}: {}", error, e);
                return;
            }
        };
        if let Err(e) = writeln!(self.err, "{}", line).and_then(|_| self.err.flush()) {
            warn!("error channel unavailable ({}), dropped: {}", e, line);
        }
    }

    pub fn into_inner(self) -> (O, E) {
        (self.out, self.err)
    }
}


#[cfg(test)]
mod test {

    use std::error::Error;

    use crate::error::LprErrorKind;

    use super::*;

    #[test]
    fn lines_go_to_their_channels() -> Result<(), Box<dyn Error>> {
        let mut reporter = Reporter::new(Vec::new(), Vec::new());
        reporter.results(&Results::empty(4, 4))?;
        reporter.error(&LprError::from(LprErrorKind::UnsupportedInput("notes.txt".into())));
        let (out, err) = reporter.into_inner();

        let out = String::from_utf8(out)?;
        assert_eq!(out.lines().count(), 1);
        assert!(out.contains("\"alpr_results\""));

        let err: serde_json::Value = serde_json::from_slice(&err)?;
        assert_eq!(err["error"], "unknown file type: notes.txt");
        assert_eq!(err["kind"], "unsupported_input");
        Ok(())
    }
}
