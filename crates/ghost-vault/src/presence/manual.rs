//! Manual confirmation fallback
//!
//! The operator confirms presence by pressing Enter. Lines are read on a
//! helper thread, one line per outstanding request, so input typed after a
//! confirmation is left for whoever reads the terminal next.

use std::io::{self, BufRead, BufReader};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;
use tracing::debug;

use super::{PresenceBackend, PresenceEvent};
use crate::error::Result;

type LineResult = io::Result<Option<String>>;

struct LineReader {
    requests: Sender<()>,
    lines: Receiver<LineResult>,
    pending: bool,
}

impl LineReader {
    fn spawn(mut input: Box<dyn BufRead + Send>) -> io::Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<()>();
        let (line_tx, line_rx) = mpsc::channel::<LineResult>();

        thread::Builder::new()
            .name("ghost-confirm".to_string())
            .spawn(move || {
                while request_rx.recv().is_ok() {
                    let mut line = String::new();
                    let result = match input.read_line(&mut line) {
                        Ok(0) => Ok(None),
                        Ok(_) => Ok(Some(line)),
                        Err(e) => Err(e),
                    };
                    let done = !matches!(result, Ok(Some(_)));
                    if line_tx.send(result).is_err() || done {
                        break;
                    }
                }
            })?;

        Ok(Self {
            requests: request_tx,
            lines: line_rx,
            pending: false,
        })
    }
}

/// Presence confirmed by a line of operator input
pub struct ManualConfirmation {
    input: Option<Box<dyn BufRead + Send>>,
    reader: Option<LineReader>,
    prompt: Option<String>,
    exhausted: bool,
}

impl ManualConfirmation {
    pub fn new<R: BufRead + Send + 'static>(input: R) -> Self {
        Self {
            input: Some(Box::new(input)),
            reader: None,
            prompt: None,
            exhausted: false,
        }
    }

    /// Read confirmations from the process's standard input
    pub fn stdin() -> Self {
        Self::new(BufReader::new(io::stdin()))
            .with_prompt("Presence check: press Enter to confirm you are at the console")
    }

    /// Message written to stderr when waiting for confirmation
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    fn reader(&mut self) -> io::Result<Option<&mut LineReader>> {
        if self.reader.is_none() {
            match self.input.take() {
                Some(input) => self.reader = Some(LineReader::spawn(input)?),
                None => return Ok(None),
            }
        }
        Ok(self.reader.as_mut())
    }
}

impl PresenceBackend for ManualConfirmation {
    fn backend_type(&self) -> &'static str {
        "manual"
    }

    fn detect(&mut self, timeout: Duration, observer: &mut dyn FnMut(PresenceEvent)) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        if let Some(prompt) = &self.prompt {
            eprintln!("{}", prompt);
        }

        let Some(reader) = self.reader()? else {
            return Ok(false);
        };
        if !reader.pending {
            if reader.requests.send(()).is_err() {
                self.exhausted = true;
                return Ok(false);
            }
            reader.pending = true;
        }
        observer(PresenceEvent::Prompted);

        match reader.lines.recv_timeout(timeout) {
            Ok(Ok(Some(_))) => {
                reader.pending = false;
                debug!("Presence confirmed manually");
                Ok(true)
            }
            Ok(Ok(None)) | Err(RecvTimeoutError::Disconnected) => {
                debug!("Confirmation input closed");
                self.exhausted = true;
                Ok(false)
            }
            Ok(Err(e)) => {
                reader.pending = false;
                Err(e.into())
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_enter_confirms() {
        let mut backend = ManualConfirmation::new(Cursor::new(b"\n".to_vec()));

        let mut prompted = false;
        let confirmed = backend
            .detect(Duration::from_secs(5), &mut |event| {
                prompted |= matches!(event, PresenceEvent::Prompted)
            })
            .unwrap();

        assert!(confirmed);
        assert!(prompted);
    }

    #[test]
    fn test_each_detection_consumes_one_line() {
        let mut backend = ManualConfirmation::new(Cursor::new(b"yes\nagain\n".to_vec()));

        assert!(backend.detect(Duration::from_secs(5), &mut |_| {}).unwrap());
        assert!(backend.detect(Duration::from_secs(5), &mut |_| {}).unwrap());
        assert!(!backend.detect(Duration::from_secs(5), &mut |_| {}).unwrap());
    }

    #[test]
    fn test_closed_input_is_not_presence() {
        let mut backend = ManualConfirmation::new(Cursor::new(Vec::new()));
        assert!(!backend.detect(Duration::from_secs(5), &mut |_| {}).unwrap());
        // Stays closed
        assert!(!backend.detect(Duration::from_millis(10), &mut |_| {}).unwrap());
    }

    #[test]
    fn test_no_input_times_out() {
        // Pipe that never delivers a line
        struct Blocking(Receiver<()>);
        impl io::Read for Blocking {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                let _ = self.0.recv();
                Ok(0)
            }
        }

        let (_keep_open, rx) = mpsc::channel();
        let mut backend = ManualConfirmation::new(BufReader::new(Blocking(rx)));
        let confirmed = backend.detect(Duration::from_millis(50), &mut |_| {}).unwrap();
        assert!(!confirmed);
    }
}
