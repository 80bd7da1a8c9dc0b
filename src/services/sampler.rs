use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

/// Source fps to assume when the decoder cannot report one.
pub const DEFAULT_FPS: f64 = 30.0;

/// One decoded frame as an encoded image payload.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    pub data: Vec<u8>,
}

/// A frame selected by the sampler.
#[derive(Debug, Clone)]
pub struct SampledFrame {
    pub buffer: FrameBuffer,
    /// Ordinal of this frame within the original stream, not a
    /// re-numbered sampled sequence.
    pub frame_index: u64,
    pub timestamp_sec: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to open video: {0}")]
    Open(String),

    #[error("frame probe failed: {0}")]
    Probe(String),

    #[error("decode I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pull-based seam over an external video decoder. The sampler only
/// needs the reported frame rate and frames in decode order.
pub trait VideoDecoder {
    /// Source frame rate; may legitimately report 0 or negative when
    /// the container does not carry one.
    fn frame_rate(&self) -> f64;

    /// Next frame in decode order, `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<FrameBuffer>, DecodeError>;
}

impl<T: VideoDecoder + ?Sized> VideoDecoder for Box<T> {
    fn frame_rate(&self) -> f64 {
        (**self).frame_rate()
    }

    fn next_frame(&mut self) -> Result<Option<FrameBuffer>, DecodeError> {
        (**self).next_frame()
    }
}

/// Finite, deterministic frame sampler: emits every `stride`-th decoded
/// frame until the stream ends or `max_frames` samples were produced.
///
/// `stride = max(round(fps / target_fps), 1)`, with `fps` falling back
/// to [`DEFAULT_FPS`] when unreported. Not restartable.
pub struct FrameSampler<D> {
    decoder: D,
    fps: f64,
    stride: u64,
    stream_index: u64,
    emitted: u32,
    max_frames: u32,
    done: bool,
}

impl<D: VideoDecoder> FrameSampler<D> {
    pub fn new(decoder: D, target_fps: f64, max_frames: u32) -> Self {
        let reported = decoder.frame_rate();
        let fps = if reported > 0.0 && reported.is_finite() {
            reported
        } else {
            DEFAULT_FPS
        };
        let stride = ((fps / target_fps.max(0.1)).round() as u64).max(1);

        Self {
            decoder,
            fps,
            stride,
            stream_index: 0,
            emitted: 0,
            max_frames,
            done: false,
        }
    }

    /// Number of decoded frames skipped between two samples.
    pub fn stride(&self) -> u64 {
        self.stride
    }
}

impl<D: VideoDecoder> Iterator for FrameSampler<D> {
    type Item = Result<SampledFrame, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.emitted >= self.max_frames {
            return None;
        }

        loop {
            let frame = match self.decoder.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            let index = self.stream_index;
            self.stream_index += 1;

            if index % self.stride != 0 {
                continue;
            }

            self.emitted += 1;
            return Some(Ok(SampledFrame {
                buffer: frame,
                frame_index: index,
                timestamp_sec: index as f64 / self.fps,
            }));
        }
    }
}

const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Decoder backed by the ffmpeg CLI: frames arrive on stdout as an
/// MJPEG stream and are split on the JPEG end-of-image marker. Keeps
/// the actual decoding outside this crate.
pub struct FfmpegDecoder {
    child: Child,
    stdout: ChildStdout,
    pending: Vec<u8>,
    fps: f64,
}

impl FfmpegDecoder {
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        // A probe failure is not fatal; report 0 and let the sampler
        // fall back to its default fps.
        let fps = probe_frame_rate(path).unwrap_or(0.0);

        let mut child = Command::new("ffmpeg")
            .arg("-v")
            .arg("error")
            .arg("-i")
            .arg(path)
            .args(["-f", "image2pipe", "-vcodec", "mjpeg", "-q:v", "3", "-"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| DecodeError::Open(format!("failed to spawn ffmpeg: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DecodeError::Open("ffmpeg stdout not captured".to_string()))?;

        Ok(Self {
            child,
            stdout,
            pending: Vec::new(),
            fps,
        })
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<FrameBuffer>, DecodeError> {
        let mut chunk = [0u8; 64 * 1024];

        loop {
            if let Some(end) = find_marker(&self.pending, &JPEG_EOI) {
                let frame: Vec<u8> = self.pending.drain(..end + 2).collect();
                return Ok(Some(FrameBuffer { data: frame }));
            }

            let n = self.stdout.read(&mut chunk)?;
            if n == 0 {
                // Stream closed; anything left is a truncated frame.
                self.pending.clear();
                return Ok(None);
            }
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn find_marker(haystack: &[u8], marker: &[u8; 2]) -> Option<usize> {
    haystack
        .windows(2)
        .position(|window| window == marker)
}

/// Ask ffprobe for the stream's average frame rate ("30000/1001" or a
/// plain number).
fn probe_frame_rate(path: &Path) -> Result<f64, DecodeError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=avg_frame_rate",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .map_err(|e| DecodeError::Probe(format!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        return Err(DecodeError::Probe(format!(
            "ffprobe exited with {}",
            output.status
        )));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    parse_frame_rate(text.trim())
        .ok_or_else(|| DecodeError::Probe(format!("unparseable frame rate {text:?}")))
}

fn parse_frame_rate(text: &str) -> Option<f64> {
    if let Some((num, den)) = text.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let den: f64 = den.trim().parse().ok()?;
        if den == 0.0 {
            return Some(0.0);
        }
        return Some(num / den);
    }
    text.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Decoder emitting `frames` single-byte frames at a fixed rate.
    struct StubDecoder {
        fps: f64,
        frames: u64,
        cursor: u64,
        fail_at: Option<u64>,
    }

    impl StubDecoder {
        fn new(fps: f64, frames: u64) -> Self {
            Self {
                fps,
                frames,
                cursor: 0,
                fail_at: None,
            }
        }
    }

    impl VideoDecoder for StubDecoder {
        fn frame_rate(&self) -> f64 {
            self.fps
        }

        fn next_frame(&mut self) -> Result<Option<FrameBuffer>, DecodeError> {
            if self.fail_at == Some(self.cursor) {
                return Err(DecodeError::Probe("injected decode failure".to_string()));
            }
            if self.cursor >= self.frames {
                return Ok(None);
            }
            let data = vec![(self.cursor % 251) as u8];
            self.cursor += 1;
            Ok(Some(FrameBuffer { data }))
        }
    }

    fn sampled_indexes(fps: f64, frames: u64, target: f64, max: u32) -> Vec<u64> {
        FrameSampler::new(StubDecoder::new(fps, frames), target, max)
            .map(|f| f.unwrap().frame_index)
            .collect()
    }

    #[test]
    fn stride_is_fps_over_target() {
        assert_eq!(sampled_indexes(30.0, 61, 1.0, 10), vec![0, 30, 60]);

        // 29.97 rounds to the same every-30th cadence.
        assert_eq!(sampled_indexes(29.97, 61, 1.0, 10), vec![0, 30, 60]);

        // Target above source rate clamps to every frame.
        assert_eq!(sampled_indexes(10.0, 3, 60.0, 10), vec![0, 1, 2]);
    }

    #[test]
    fn unreported_fps_falls_back_to_default() {
        // fps 0 and NaN both fall back to 30, so target 1 samples every
        // 30th frame and stamps timestamps against the fallback rate.
        assert_eq!(sampled_indexes(0.0, 61, 1.0, 10), vec![0, 30, 60]);
        assert_eq!(sampled_indexes(f64::NAN, 61, 1.0, 10), vec![0, 30, 60]);

        let frames: Vec<_> = FrameSampler::new(StubDecoder::new(0.0, 61), 1.0, 10)
            .map(|f| f.unwrap())
            .collect();
        assert_eq!(frames[1].timestamp_sec, 30.0 / DEFAULT_FPS);
    }

    #[test]
    fn emits_stream_ordinals_and_timestamps() {
        let sampler = FrameSampler::new(StubDecoder::new(30.0, 90), 1.0, 100);
        let frames: Vec<_> = sampler.map(|f| f.unwrap()).collect();

        let indexes: Vec<u64> = frames.iter().map(|f| f.frame_index).collect();
        assert_eq!(indexes, vec![0, 30, 60]);

        assert_eq!(frames[1].timestamp_sec, 1.0);
        assert_eq!(frames[2].timestamp_sec, 2.0);
    }

    #[test]
    fn never_exceeds_max_frames() {
        let sampler = FrameSampler::new(StubDecoder::new(30.0, 100_000), 30.0, 5);
        assert_eq!(sampler.count(), 5);

        // Even with fallback fps the cap holds.
        let sampler = FrameSampler::new(StubDecoder::new(0.0, 100_000), 1.0, 7);
        assert_eq!(sampler.count(), 7);
    }

    #[test]
    fn decode_error_ends_the_stream() {
        let mut decoder = StubDecoder::new(30.0, 100);
        decoder.fail_at = Some(31);
        let mut sampler = FrameSampler::new(decoder, 1.0, 100);

        assert!(sampler.next().unwrap().is_ok()); // frame 0
        assert!(sampler.next().unwrap().is_err()); // hits failure while skipping
        assert!(sampler.next().is_none());
    }

    #[test]
    fn frame_rate_parsing() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("30000/1001").map(|v| v.round()), Some(30.0));
        assert_eq!(parse_frame_rate("0/0"), Some(0.0));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("n/a/x"), None);
    }

    #[test]
    fn jpeg_marker_split() {
        let data = [0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9, 0xFF, 0xD8];
        assert_eq!(find_marker(&data, &JPEG_EOI), Some(4));
        assert_eq!(find_marker(&data[..4], &JPEG_EOI), None);
    }
}
