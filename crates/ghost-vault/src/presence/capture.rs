//! Microphone capture through an external recorder process
//!
//! The recorder (ALSA `arecord` by default) streams raw s16le mono PCM on
//! stdout. The process lives only for the duration of one detection attempt.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Duration;
use tracing::{debug, warn};

use super::goertzel::ToneAnalyzer;
use super::tone::{listen, ChunkReader, PcmReader};
use super::{PresenceBackend, PresenceEvent};
use crate::config::PresenceConfig;
use crate::error::{Result, VaultError};

/// A running recorder process, killed on drop
///
/// Its stdout is handed out separately so a reader thread can block on it;
/// killing the process closes the pipe and releases that thread.
pub struct Recorder {
    child: Child,
}

impl Recorder {
    pub fn spawn(program: &str, args: &[String]) -> io::Result<(Self, PcmReader<ChildStdout>)> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "recorder stdout was not captured",
                ));
            }
        };

        debug!("Started {} (pid {})", program, child.id());
        Ok((Self { child }, PcmReader::new(stdout)))
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            // Already exited
            debug!("Recorder kill: {}", e);
        }
        let _ = self.child.wait();
    }
}

/// Resolve a program name against `PATH`
pub fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}

/// Tone detection on live microphone input
pub struct CaptureBackend {
    program: String,
    args: Vec<String>,
    config: PresenceConfig,
}

impl CaptureBackend {
    pub fn new(program: impl Into<String>, config: PresenceConfig) -> Self {
        Self {
            program: program.into(),
            args: config.expanded_capture_args(),
            config,
        }
    }

    /// Build from config when the configured recorder is installed
    pub fn from_config(config: &PresenceConfig) -> Option<Self> {
        let program = config.capture_program.as_deref()?;
        match find_program(program) {
            Some(path) => {
                debug!("Using recorder at {:?}", path);
                Some(Self::new(program, config.clone()))
            }
            None => {
                warn!("Recorder {} not found on PATH", program);
                None
            }
        }
    }
}

impl PresenceBackend for CaptureBackend {
    fn backend_type(&self) -> &'static str {
        "capture"
    }

    fn detect(&mut self, timeout: Duration, observer: &mut dyn FnMut(PresenceEvent)) -> Result<bool> {
        let (recorder, pcm) = Recorder::spawn(&self.program, &self.args).map_err(|e| {
            VaultError::DeviceIo(format!("failed to start {}: {}", self.program, e))
        })?;
        let chunk_size = ToneAnalyzer::new(&self.config).chunk_size();
        let mut reader = ChunkReader::spawn(pcm, chunk_size)?;

        let detected = listen(&mut reader, &self.config, timeout, observer);
        drop(reader);
        drop(recorder);
        detected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::SampleSource;
    use std::time::Instant;

    #[test]
    fn test_missing_program_is_not_found() {
        assert!(find_program("ghost-shell-no-such-recorder").is_none());
        assert!(find_program("/nonexistent/dir/recorder").is_none());
    }

    #[test]
    fn test_missing_recorder_disables_backend() {
        let config = PresenceConfig {
            capture_program: Some("ghost-shell-no-such-recorder".to_string()),
            ..PresenceConfig::default()
        };
        assert!(CaptureBackend::from_config(&config).is_none());

        let config = PresenceConfig {
            capture_program: None,
            ..PresenceConfig::default()
        };
        assert!(CaptureBackend::from_config(&config).is_none());
    }

    #[test]
    fn test_spawn_failure_is_device_error() {
        let mut backend =
            CaptureBackend::new("ghost-shell-no-such-recorder", PresenceConfig::default());
        let result = backend.detect(Duration::from_millis(50), &mut |_| {});
        assert!(matches!(result, Err(VaultError::DeviceIo(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_silent_recorder_is_bounded_by_timeout() {
        // `sleep` stays alive without writing a single frame
        let Some(program) = find_program("sleep") else {
            return;
        };
        let mut backend = CaptureBackend {
            program: program.to_string_lossy().into_owned(),
            args: vec!["30".to_string()],
            config: PresenceConfig::default(),
        };

        let start = Instant::now();
        let detected = backend.detect(Duration::from_millis(200), &mut |_| {}).unwrap();

        assert!(!detected);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn test_dropping_recorder_kills_the_process() {
        let Some(program) = find_program("sleep") else {
            return;
        };
        let (recorder, mut pcm) =
            Recorder::spawn(&program.to_string_lossy(), &["30".to_string()]).unwrap();
        drop(recorder);

        // The pipe is closed once the process is gone
        let mut buf = [0i16; 16];
        assert_eq!(pcm.read_samples(&mut buf).unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_recorder_that_exits_immediately_is_an_error() {
        // `true` produces no output and exits
        let Some(program) = find_program("true") else {
            return;
        };
        let mut backend = CaptureBackend {
            program: program.to_string_lossy().into_owned(),
            args: Vec::new(),
            config: PresenceConfig::default(),
        };
        assert!(backend.detect(Duration::from_millis(200), &mut |_| {}).is_err());
    }
}
