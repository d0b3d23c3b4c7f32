use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use distinct_frames_common::frame::{Frame, VideoInfo};
use image::RgbImage;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{FrameSource, SourceError};

/// Decodes a video into packed RGB24 frames by piping `ffmpeg -f rawvideo` output.
///
/// Video-level metadata comes from a prior `ffprobe` call. The ffmpeg child is
/// killed and reaped when the source is dropped, so an early return from the read
/// loop never leaks a decoder process.
pub struct FfmpegSource {
    info: VideoInfo,
    child: Child,
    stdout: BufReader<ChildStdout>,
    next_index: u64,
    finished: bool,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    nb_frames: Option<String>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
}

impl FfmpegSource {
    pub fn open(path: &Path, ffmpeg: &str, ffprobe: &str) -> Result<Self, SourceError> {
        if !path.is_file() {
            return Err(SourceError::NotFound(path.to_path_buf()));
        }

        let info = probe(path, ffprobe)?;

        let mut child = Command::new(ffmpeg)
            .args(["-v", "error", "-nostdin", "-noautorotate", "-i"])
            .arg(path)
            .args(["-an", "-sn", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| unreadable(path, format!("failed to spawn {ffmpeg}: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| unreadable(path, "could not get ffmpeg stdout handle".into()))?;

        debug!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            fps = info.fps,
            frame_count = info.frame_count,
            "ffmpeg decoder started"
        );

        Ok(Self {
            info,
            child,
            stdout: BufReader::with_capacity(1 << 20, stdout),
            next_index: 0,
            finished: false,
        })
    }

    /// Fill `buf` completely. Returns the number of bytes read, which is less than
    /// `buf.len()` only at end of stream.
    fn fill(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    /// Kill ffmpeg if it is still running and reap it.
    fn stop(&mut self) {
        self.finished = true;
        if let Err(e) = self.child.kill() {
            if e.kind() != ErrorKind::InvalidInput {
                warn!(path = %self.info.path.display(), error = %e, "failed to kill ffmpeg");
            }
        }
        if let Err(e) = self.child.wait() {
            warn!(path = %self.info.path.display(), error = %e, "failed to reap ffmpeg");
        }
    }

    /// Reap ffmpeg after its stdout closed and turn a failed exit into a read error.
    fn finish(&mut self) -> Result<(), SourceError> {
        self.finished = true;
        let status = self.child.wait().map_err(|e| SourceError::Read {
            index: self.next_index,
            reason: format!("failed to wait for ffmpeg: {e}"),
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(SourceError::Read {
                index: self.next_index,
                reason: format!("ffmpeg exited with {status}"),
            })
        }
    }
}

impl FrameSource for FfmpegSource {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.finished {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.info.frame_len()];
        let filled = self.fill(&mut buf).map_err(|e| SourceError::Read {
            index: self.next_index,
            reason: e.to_string(),
        })?;

        if filled == 0 {
            self.finish()?;
            return Ok(None);
        }
        if filled < buf.len() {
            self.stop();
            return Err(SourceError::Read {
                index: self.next_index,
                reason: format!("truncated frame: got {filled} of {} bytes", buf.len()),
            });
        }

        let image = RgbImage::from_raw(self.info.width, self.info.height, buf).ok_or_else(|| {
            SourceError::Read {
                index: self.next_index,
                reason: "frame buffer does not match video dimensions".into(),
            }
        })?;

        let index = self.next_index;
        self.next_index += 1;
        Ok(Some(Frame::new(index, self.info.timestamp_for(index), image)))
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        if !self.finished {
            self.stop();
        }
    }
}

/// Warn at startup if `ffmpeg` or `ffprobe` cannot be run; every video would fail.
pub async fn check_tools_available(ffmpeg: &str, ffprobe: &str) {
    for tool in [ffmpeg, ffprobe] {
        match tokio::process::Command::new(tool).arg("-version").output().await {
            Ok(out) if out.status.success() => {
                debug!(tool, "decoder tool is available");
            }
            Ok(_) => {
                warn!(tool, "non-zero exit for -version; decoding may fail");
            }
            Err(e) => {
                warn!(
                    error = %e,
                    tool,
                    "not found; every video will be reported as unreadable. \
                     Install ffmpeg or set extraction.ffmpeg_path / ffprobe_path."
                );
            }
        }
    }
}

/// Read width, height, frame count and frame rate of the first video stream.
fn probe(path: &Path, ffprobe: &str) -> Result<VideoInfo, SourceError> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,nb_frames,avg_frame_rate,r_frame_rate",
            "-print_format",
            "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| unreadable(path, format!("failed to run {ffprobe}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(unreadable(path, format!("ffprobe failed: {}", stderr.trim())));
    }

    parse_probe(path, &output.stdout)
}

fn parse_probe(path: &Path, json: &[u8]) -> Result<VideoInfo, SourceError> {
    let probe: ProbeOutput = serde_json::from_slice(json)
        .map_err(|e| unreadable(path, format!("invalid ffprobe output: {e}")))?;
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| unreadable(path, "no video stream".into()))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(unreadable(path, "video stream has no dimensions".into())),
    };

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
        .unwrap_or(0.0);

    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .unwrap_or(0);

    Ok(VideoInfo {
        path: path.to_path_buf(),
        width,
        height,
        frame_count,
        fps,
    })
}

/// Parse an ffprobe rational such as `30000/1001`. `0/0` and garbage yield `None`.
fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = match rate.split_once('/') {
        Some((n, d)) => (n.trim().parse::<f64>().ok()?, d.trim().parse::<f64>().ok()?),
        None => (rate.trim().parse::<f64>().ok()?, 1.0),
    };
    if den == 0.0 || num <= 0.0 {
        return None;
    }
    Some(num / den)
}

fn unreadable(path: &Path, reason: String) -> SourceError {
    SourceError::Unreadable {
        path: PathBuf::from(path),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn parses_rational_rates() {
        assert_eq!(parse_rate("25/1"), Some(25.0));
        assert!((parse_rate("30000/1001").unwrap() - 29.97).abs() < 1e-2);
        assert_eq!(parse_rate("12.5"), Some(12.5));
        assert_eq!(parse_rate("0/0"), None);
        assert_eq!(parse_rate("abc"), None);
    }

    #[test]
    fn parses_probe_json() {
        let json = br#"{
            "streams": [
                {"width": 1280, "height": 720, "nb_frames": "300",
                 "avg_frame_rate": "30/1", "r_frame_rate": "30/1"}
            ]
        }"#;
        let info = parse_probe(Path::new("clip.mp4"), json).unwrap();
        assert_eq!(info.width, 1280);
        assert_eq!(info.height, 720);
        assert_eq!(info.frame_count, 300);
        assert_eq!(info.fps, 30.0);
    }

    #[test]
    fn probe_falls_back_to_r_frame_rate_and_unknown_count() {
        let json = br#"{"streams": [{"width": 64, "height": 48,
            "avg_frame_rate": "0/0", "r_frame_rate": "24/1"}]}"#;
        let info = parse_probe(Path::new("clip.mkv"), json).unwrap();
        assert_eq!(info.fps, 24.0);
        assert_eq!(info.frame_count, 0);
    }

    #[test]
    fn probe_without_video_stream_is_unreadable() {
        let err = parse_probe(Path::new("song.mp4"), br#"{"streams": []}"#).unwrap_err();
        assert!(matches!(err, SourceError::Unreadable { .. }));

        let err = parse_probe(Path::new("bad.mp4"), b"not json").unwrap_err();
        assert!(matches!(err, SourceError::Unreadable { .. }));
    }

    /// Spawning a freshly written script races with concurrent forks (ETXTBSY).
    static SPAWN: Mutex<()> = Mutex::new(());

    /// Stand-in ffprobe/ffmpeg pair for a 2x2 video at 10 fps. `ffmpeg_body` is the
    /// shell snippet that produces the raw frame stream.
    struct FakeTools {
        dir: tempfile::TempDir,
        video: PathBuf,
    }

    impl FakeTools {
        fn new(ffmpeg_body: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let video = dir.path().join("clip.mp4");
            std::fs::write(&video, b"").unwrap();
            script(
                &dir.path().join("ffprobe"),
                r#"echo '{"streams": [{"width": 2, "height": 2, "nb_frames": "2", "avg_frame_rate": "10/1"}]}'"#,
            );
            script(&dir.path().join("ffmpeg"), ffmpeg_body);
            Self { dir, video }
        }

        fn open(&self) -> FfmpegSource {
            let tool = |name: &str| self.dir.path().join(name).display().to_string();
            FfmpegSource::open(&self.video, &tool("ffmpeg"), &tool("ffprobe")).unwrap()
        }
    }

    fn script(path: &Path, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn is_reaped(pid: u32) -> bool {
        !Path::new(&format!("/proc/{pid}")).exists()
    }

    #[test]
    fn reads_whole_frames_until_end_of_stream() {
        let _guard = SPAWN.lock().unwrap_or_else(|e| e.into_inner());
        let tools = FakeTools::new("head -c 24 /dev/zero");
        let mut source = tools.open();
        assert_eq!(source.info().frame_len(), 12);

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!((first.index, first.timestamp_sec), (0, 0.0));
        assert_eq!((first.width(), first.height()), (2, 2));
        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.index, 1);
        assert!((second.timestamp_sec - 0.1).abs() < 1e-12);

        assert!(source.next_frame().unwrap().is_none());
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn truncated_tail_is_a_read_failure_and_reaps_ffmpeg() {
        let _guard = SPAWN.lock().unwrap_or_else(|e| e.into_inner());
        let tools = FakeTools::new("head -c 17 /dev/zero");
        let mut source = tools.open();
        let pid = source.child.id();

        assert!(source.next_frame().unwrap().is_some());
        let err = source.next_frame().unwrap_err();
        assert!(
            matches!(err, SourceError::Read { index: 1, ref reason } if reason.contains("got 5 of 12")),
            "unexpected error: {err:?}"
        );
        assert!(is_reaped(pid));
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn failed_exit_is_a_read_failure() {
        let _guard = SPAWN.lock().unwrap_or_else(|e| e.into_inner());
        let tools = FakeTools::new("head -c 12 /dev/zero\nexit 3");
        let mut source = tools.open();

        assert!(source.next_frame().unwrap().is_some());
        let err = source.next_frame().unwrap_err();
        assert!(
            matches!(err, SourceError::Read { index: 1, ref reason } if reason.contains("exited")),
            "unexpected error: {err:?}"
        );
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn drop_kills_and_reaps_running_decoder() {
        let _guard = SPAWN.lock().unwrap_or_else(|e| e.into_inner());
        let tools = FakeTools::new("head -c 12 /dev/zero\nexec sleep 30");
        let mut source = tools.open();
        let pid = source.child.id();

        assert!(source.next_frame().unwrap().is_some());
        assert!(!is_reaped(pid));
        drop(source);
        assert!(is_reaped(pid));
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = FfmpegSource::open(Path::new("/no/such/video.mp4"), "ffmpeg", "ffprobe")
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::NotFound(_)));
    }
}
