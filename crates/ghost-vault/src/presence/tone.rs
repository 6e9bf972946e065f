//! Tone backend over a PCM sample source

use std::f64::consts::PI;
use std::io::{self, Read};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use super::goertzel::{Debounce, ToneAnalyzer};
use super::{PresenceBackend, PresenceEvent};
use crate::config::PresenceConfig;
use crate::error::{Result, VaultError};

/// Anything that yields signed 16-bit mono samples
pub trait SampleSource: Send {
    /// Fill `buf` as far as possible; 0 means the stream has ended
    fn read_samples(&mut self, buf: &mut [i16]) -> io::Result<usize>;
}

/// Signed 16-bit little-endian PCM from any reader
pub struct PcmReader<R> {
    inner: R,
    scratch: Vec<u8>,
}

impl<R: Read> PcmReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            scratch: Vec::new(),
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Send> SampleSource for PcmReader<R> {
    fn read_samples(&mut self, buf: &mut [i16]) -> io::Result<usize> {
        self.scratch.resize(buf.len() * 2, 0);

        let mut filled = 0;
        while filled < self.scratch.len() {
            match self.inner.read(&mut self.scratch[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        let samples = filled / 2;
        for (sample, pair) in buf.iter_mut().zip(self.scratch[..samples * 2].chunks_exact(2)) {
            *sample = i16::from_le_bytes([pair[0], pair[1]]);
        }
        Ok(samples)
    }
}

/// Synthetic sine (or silence) source
#[derive(Debug, Clone)]
pub struct ToneGenerator {
    frequency: f64,
    amplitude: f64,
    sample_rate: u32,
    position: u64,
    remaining: Option<u64>,
}

impl ToneGenerator {
    /// Endless sine at `amplitude` (0.0..=1.0 of full scale)
    pub fn sine(frequency: f64, amplitude: f64, sample_rate: u32) -> Self {
        Self {
            frequency,
            amplitude: amplitude.clamp(0.0, 1.0),
            sample_rate,
            position: 0,
            remaining: None,
        }
    }

    pub fn silence(sample_rate: u32) -> Self {
        Self::sine(0.0, 0.0, sample_rate)
    }

    /// Stop after `samples` samples
    pub fn with_limit(mut self, samples: u64) -> Self {
        self.remaining = Some(samples);
        self
    }
}

impl SampleSource for ToneGenerator {
    fn read_samples(&mut self, buf: &mut [i16]) -> io::Result<usize> {
        let count = match self.remaining {
            Some(remaining) => buf.len().min(remaining as usize),
            None => buf.len(),
        };

        let step = 2.0 * PI * self.frequency / self.sample_rate as f64;
        for sample in &mut buf[..count] {
            let value = self.amplitude * i16::MAX as f64 * (step * self.position as f64).sin();
            *sample = value.round() as i16;
            self.position += 1;
        }

        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= count as u64;
        }
        Ok(count)
    }
}

fn fill_chunk<S: SampleSource + ?Sized>(source: &mut S, chunk: &mut [i16]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < chunk.len() {
        let n = source.read_samples(&mut chunk[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

type ChunkResult = io::Result<Vec<i16>>;

/// Reads chunks on a helper thread, one chunk per outstanding request
///
/// A source that blocks inside `read_samples` only stalls the helper; the
/// caller waits on the channel with a deadline. A chunk shorter than the
/// requested size marks the end of the stream.
pub struct ChunkReader {
    requests: Sender<()>,
    chunks: Receiver<ChunkResult>,
    chunk_size: usize,
    pending: bool,
    ended: bool,
}

impl ChunkReader {
    pub fn spawn<S: SampleSource + 'static>(mut source: S, chunk_size: usize) -> io::Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<()>();
        let (chunk_tx, chunk_rx) = mpsc::channel::<ChunkResult>();

        thread::Builder::new()
            .name("ghost-pcm".to_string())
            .spawn(move || {
                while request_rx.recv().is_ok() {
                    let mut chunk = vec![0i16; chunk_size];
                    let result = fill_chunk(&mut source, &mut chunk).map(|filled| {
                        chunk.truncate(filled);
                        chunk
                    });
                    let done = !matches!(&result, Ok(chunk) if chunk.len() == chunk_size);
                    if chunk_tx.send(result).is_err() || done {
                        break;
                    }
                }
            })?;

        Ok(Self {
            requests: request_tx,
            chunks: chunk_rx,
            chunk_size,
            pending: false,
            ended: false,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Next chunk, or `None` if nothing arrived within `wait`
    ///
    /// A timed-out request stays outstanding and is answered by the next call.
    pub fn next_chunk(&mut self, wait: Duration) -> io::Result<Option<Vec<i16>>> {
        if self.ended {
            return Ok(Some(Vec::new()));
        }
        if !self.pending {
            if self.requests.send(()).is_err() {
                self.ended = true;
                return Ok(Some(Vec::new()));
            }
            self.pending = true;
        }

        match self.chunks.recv_timeout(wait) {
            Ok(result) => {
                self.pending = false;
                match &result {
                    Ok(chunk) if chunk.len() == self.chunk_size => {}
                    _ => self.ended = true,
                }
                result.map(Some)
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                self.ended = true;
                Ok(Some(Vec::new()))
            }
        }
    }
}

/// Run the chunked detection loop until the tone is confirmed or time runs out
///
/// The deadline bounds the whole call, including waits on a source that has
/// stopped producing samples. A source that ends before yielding a single
/// full chunk is an error; one that ends later just means no presence was
/// detected.
pub fn listen(
    reader: &mut ChunkReader,
    config: &PresenceConfig,
    timeout: Duration,
    observer: &mut dyn FnMut(PresenceEvent),
) -> Result<bool> {
    let analyzer = ToneAnalyzer::new(config);
    let mut debounce = Debounce::new(config.debounce);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let mut chunks_read = 0u64;

    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        let Some(chunk) = reader.next_chunk(remaining)? else {
            debug!("Audio source stalled; no samples before the deadline");
            break;
        };
        if chunk.len() < reader.chunk_size() {
            if chunks_read == 0 {
                return Err(VaultError::DeviceIo(
                    "audio source ended before producing a full chunk".to_string(),
                ));
            }
            debug!("Audio source ended after {} chunks", chunks_read);
            return Ok(false);
        }
        chunks_read += 1;

        let analysis = analyzer.analyze(&chunk);
        let hit = analyzer.is_hit(&analysis);
        let consecutive = debounce.observe(hit);
        if hit {
            observer(PresenceEvent::ToneChunk {
                energy: analysis.energy,
                frequency: analysis.frequency,
                consecutive,
            });
        }
        if debounce.satisfied() {
            debug!("Tone confirmed after {} chunks", chunks_read);
            return Ok(true);
        }

        if !poll_interval.is_zero() {
            std::thread::sleep(poll_interval.min(deadline.saturating_duration_since(Instant::now())));
        }
    }

    debug!("No tone within {:?} ({} chunks)", timeout, chunks_read);
    Ok(false)
}

/// Presence via tone detection on an arbitrary sample source
///
/// The source moves onto a reader thread at the first detection and stays
/// there for the life of the backend.
pub struct ToneBackend<S> {
    source: Option<S>,
    reader: Option<ChunkReader>,
    config: PresenceConfig,
}

impl<S: SampleSource + 'static> ToneBackend<S> {
    pub fn new(source: S, config: PresenceConfig) -> Self {
        Self {
            source: Some(source),
            reader: None,
            config,
        }
    }

    fn reader(&mut self) -> Result<&mut ChunkReader> {
        if self.reader.is_none() {
            let source = self.source.take().ok_or_else(|| {
                VaultError::DeviceIo("audio source is no longer available".to_string())
            })?;
            let chunk_size = ToneAnalyzer::new(&self.config).chunk_size();
            self.reader = Some(ChunkReader::spawn(source, chunk_size)?);
        }
        self.reader
            .as_mut()
            .ok_or_else(|| VaultError::DeviceIo("audio reader not started".to_string()))
    }
}

impl<S: SampleSource + 'static> PresenceBackend for ToneBackend<S> {
    fn backend_type(&self) -> &'static str {
        "tone"
    }

    fn detect(&mut self, timeout: Duration, observer: &mut dyn FnMut(PresenceEvent)) -> Result<bool> {
        let config = self.config.clone();
        let reader = self.reader()?;
        listen(reader, &config, timeout, observer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn config() -> PresenceConfig {
        PresenceConfig {
            poll_interval_ms: 0,
            ..PresenceConfig::default()
        }
    }

    #[test]
    fn test_sustained_tone_is_detected() {
        let config = config();
        let mut backend = ToneBackend::new(
            ToneGenerator::sine(18_000.0, 0.5, config.sample_rate),
            config,
        );

        let mut hits = Vec::new();
        let detected = backend
            .detect(Duration::from_secs(2), &mut |event| hits.push(event))
            .unwrap();

        assert!(detected);
        assert_eq!(hits.len(), 3);
        assert!(matches!(
            hits.last(),
            Some(PresenceEvent::ToneChunk { consecutive: 3, .. })
        ));
    }

    #[test]
    fn test_silence_times_out() {
        let config = config();
        let mut backend = ToneBackend::new(ToneGenerator::silence(config.sample_rate), config);

        let timeout = Duration::from_millis(100);
        let start = Instant::now();
        let detected = backend.detect(timeout, &mut |_| {}).unwrap();

        assert!(!detected);
        assert!(start.elapsed() >= timeout);
    }

    #[test]
    fn test_short_burst_is_not_enough() {
        let config = config();
        let chunk = config.chunk_size as u64;

        // Two chunks of tone, then the stream ends
        let source = ToneGenerator::sine(18_000.0, 0.5, config.sample_rate).with_limit(2 * chunk);
        let mut backend = ToneBackend::new(source, config);
        assert!(!backend.detect(Duration::from_secs(1), &mut |_| {}).unwrap());
    }

    #[test]
    fn test_interrupted_tone_resets_debounce() {
        let config = config();
        let chunk = config.chunk_size;

        let mut tone = ToneGenerator::sine(18_000.0, 0.5, config.sample_rate);
        let mut samples = vec![0i16; chunk * 7];
        tone.read_samples(&mut samples[..chunk * 2]).unwrap();
        // chunk 3 is silent
        tone.read_samples(&mut samples[chunk * 3..chunk * 5]).unwrap();
        // chunks 6-7 silent

        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut backend = ToneBackend::new(PcmReader::new(Cursor::new(bytes)), config);

        let mut hits = 0;
        let detected = backend
            .detect(Duration::from_secs(1), &mut |_| hits += 1)
            .unwrap();
        assert!(!detected);
        assert_eq!(hits, 4);
    }

    #[test]
    fn test_empty_source_is_an_error() {
        let config = config();
        let mut backend = ToneBackend::new(PcmReader::new(Cursor::new(Vec::new())), config);
        assert!(backend.detect(Duration::from_secs(1), &mut |_| {}).is_err());
    }

    /// Source that blocks far longer than any detection window
    struct Stalled(Duration);

    impl SampleSource for Stalled {
        fn read_samples(&mut self, _buf: &mut [i16]) -> io::Result<usize> {
            std::thread::sleep(self.0);
            Ok(0)
        }
    }

    #[test]
    fn test_stalled_source_still_times_out() {
        let mut backend = ToneBackend::new(Stalled(Duration::from_secs(3)), config());

        let start = Instant::now();
        let detected = backend.detect(Duration::from_millis(100), &mut |_| {}).unwrap();

        assert!(!detected);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_source_that_resumes_is_picked_up_on_retry() {
        // First read blocks past the first window, then the tone flows
        struct SlowStart {
            delay: Option<Duration>,
            tone: ToneGenerator,
        }
        impl SampleSource for SlowStart {
            fn read_samples(&mut self, buf: &mut [i16]) -> io::Result<usize> {
                if let Some(delay) = self.delay.take() {
                    std::thread::sleep(delay);
                }
                self.tone.read_samples(buf)
            }
        }

        let config = config();
        let source = SlowStart {
            delay: Some(Duration::from_millis(300)),
            tone: ToneGenerator::sine(18_000.0, 0.5, config.sample_rate),
        };
        let mut backend = ToneBackend::new(source, config);

        assert!(!backend.detect(Duration::from_millis(50), &mut |_| {}).unwrap());
        assert!(backend.detect(Duration::from_secs(5), &mut |_| {}).unwrap());
    }

    #[test]
    fn test_chunk_reader_reports_end_of_stream() {
        let source = ToneGenerator::silence(48_000).with_limit(1500);
        let mut reader = ChunkReader::spawn(source, 1024).unwrap();

        let wait = Duration::from_secs(5);
        assert_eq!(reader.next_chunk(wait).unwrap().unwrap().len(), 1024);
        assert_eq!(reader.next_chunk(wait).unwrap().unwrap().len(), 476);
        assert!(reader.next_chunk(wait).unwrap().unwrap().is_empty());
    }

    #[test]
    fn test_pcm_reader_decodes_little_endian() {
        let bytes = vec![0x01, 0x00, 0xFF, 0x7F, 0x00, 0x80, 0x05];
        let mut reader = PcmReader::new(Cursor::new(bytes));

        let mut buf = [0i16; 4];
        assert_eq!(reader.read_samples(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_generator_limit() {
        let mut generator = ToneGenerator::silence(48_000).with_limit(10);
        let mut buf = [1i16; 8];
        assert_eq!(generator.read_samples(&mut buf).unwrap(), 8);
        assert_eq!(buf, [0i16; 8]);
        assert_eq!(generator.read_samples(&mut buf).unwrap(), 2);
        assert_eq!(generator.read_samples(&mut buf).unwrap(), 0);
    }
}
