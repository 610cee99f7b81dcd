//! ffmpeg-backed transcoder.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use super::{TranscodeRequest, Transcoder, bitrate_for};
use crate::error::{Error, Result};

/// Runs the `ffmpeg` executable. Blocking; call from `spawn_blocking`.
pub struct FfmpegTranscoder {
    program: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
        }
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Validate paths before spawning anything.
    ///
    /// Without `overwrite` the output is claimed here with `create_new`, so
    /// from then on the file belongs to this call and ffmpeg may replace it.
    fn preflight(&self, request: &TranscodeRequest) -> Result<PathBuf> {
        if request.filename.trim().is_empty() {
            return Err(Error::validation("output filename is empty"));
        }
        if !request.input.is_file() {
            return Err(Error::missing_file(&request.input));
        }
        if !request.output_dir.is_dir() {
            return Err(Error::missing_file(&request.output_dir));
        }

        let output = request.output_path();
        if !request.overwrite {
            match OpenOptions::new().write(true).create_new(true).open(&output) {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    return Err(Error::already_exists(output.display().to_string()));
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(output)
    }

    fn args(request: &TranscodeRequest, output: &std::path::Path, bitrate: u32) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-nostdin".to_string(),
            "-i".to_string(),
            request.input.to_string_lossy().into_owned(),
            "-vn".to_string(),
            "-c:a".to_string(),
            request.codec.encoder().to_string(),
        ];
        if bitrate > 0 {
            args.push("-b:a".to_string());
            args.push(format!("{bitrate}k"));
        }
        // The output is always ours by now, see `preflight`
        args.push("-y".to_string());
        args.push(output.to_string_lossy().into_owned());
        args
    }

    fn spawn_error(&self, e: std::io::Error) -> Error {
        match e.kind() {
            ErrorKind::NotFound => Error::not_found(format!(
                "{} executable (is it installed and on PATH?)",
                self.program.display()
            )),
            _ => Error::Io(e),
        }
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(&self, request: &TranscodeRequest) -> Result<(PathBuf, u32)> {
        let output = self.preflight(request)?;
        let bitrate = bitrate_for(request.codec, request.quality);

        tracing::debug!(
            target: "syncy::media",
            input = %request.input.display(),
            output = %output.display(),
            codec = request.codec.as_str(),
            bitrate,
            "Transcoding"
        );

        let result = Command::new(&self.program)
            .args(Self::args(request, &output, bitrate))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output();

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                let _ = std::fs::remove_file(&output);
                return Err(self.spawn_error(e));
            }
        };

        if !result.status.success() {
            let _ = std::fs::remove_file(&output);
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(Error::Io(std::io::Error::other(stderr.trim().to_string()))
                .context(format!("ffmpeg exited with {}", result.status)));
        }

        Ok((output, bitrate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Codec;
    use tempfile::tempdir;

    fn request(input: PathBuf, output_dir: PathBuf) -> TranscodeRequest {
        TranscodeRequest {
            input,
            output_dir,
            filename: "Song".to_string(),
            codec: Codec::Mp3,
            quality: 10,
            overwrite: false,
        }
    }

    #[test]
    fn test_missing_input() {
        let dir = tempdir().unwrap();
        let transcoder = FfmpegTranscoder::new();
        let result = transcoder.transcode(&request(dir.path().join("nope.webm"), dir.path().into()));
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_missing_output_dir() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.webm");
        std::fs::write(&input, b"x").unwrap();
        let result = FfmpegTranscoder::new().transcode(&request(input, dir.path().join("out")));
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_existing_output_without_overwrite() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.webm");
        std::fs::write(&input, b"x").unwrap();
        std::fs::write(dir.path().join("Song.mp3"), b"old").unwrap();

        let result = FfmpegTranscoder::new().transcode(&request(input, dir.path().into()));
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
        assert_eq!(std::fs::read(dir.path().join("Song.mp3")).unwrap(), b"old");
    }

    #[test]
    fn test_missing_executable() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.webm");
        std::fs::write(&input, b"x").unwrap();

        let transcoder = FfmpegTranscoder::with_program("/nonexistent/ffmpeg");
        let result = transcoder.transcode(&request(input, dir.path().into()));
        assert!(matches!(result, Err(Error::NotFound(_))));
        // The claimed output is released again
        assert!(!dir.path().join("Song.mp3").exists());
    }

    #[test]
    fn test_args_per_codec() {
        let mut req = request(PathBuf::from("/in.webm"), PathBuf::from("/out"));
        let args = FfmpegTranscoder::args(&req, &req.output_path(), 320);
        assert!(args.windows(2).any(|w| w == ["-c:a", "libmp3lame"]));
        assert!(args.windows(2).any(|w| w == ["-b:a", "320k"]));
        assert!(args.contains(&"-y".to_string()));
        assert!(!args.contains(&"-n".to_string()));

        req.codec = Codec::Wav;
        req.overwrite = true;
        let args = FfmpegTranscoder::args(&req, &req.output_path(), 0);
        assert!(args.windows(2).any(|w| w == ["-c:a", "pcm_s16le"]));
        assert!(!args.contains(&"-b:a".to_string()));
        assert_eq!(args.last().unwrap(), "/out/Song.wav");
    }
}
