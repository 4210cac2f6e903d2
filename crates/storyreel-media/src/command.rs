//! FFmpeg command builder and a generic external tool runner.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Lines of stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
struct Input {
    args: Vec<String>,
    path: PathBuf,
}

/// Builder for FFmpeg commands with any number of inputs.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    inputs: Vec<Input>,
    output: PathBuf,
    /// Output arguments (after all inputs)
    output_args: Vec<String>,
    overwrite: bool,
    log_level: String,
}

impl FfmpegCommand {
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add an input file.
    pub fn input(self, path: impl AsRef<Path>) -> Self {
        self.input_with_args(Vec::<String>::new(), path)
    }

    /// Add an input file preceded by its own options (`-ss`, `-stream_loop`, ...).
    pub fn input_with_args<I, S>(mut self, args: I, path: impl AsRef<Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.push(Input {
            args: args.into_iter().map(Into::into).collect(),
            path: path.as_ref().to_path_buf(),
        });
        self
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    /// Map a stream or filter label into the output.
    pub fn map(self, spec: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(spec)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    pub fn frame_rate(self, fps: u32) -> Self {
        self.output_arg("-r").output_arg(fps.to_string())
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }
        args.push("-v".to_string());
        args.push(self.log_level.clone());

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.path.to_string_lossy().to_string());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());
        args
    }
}

/// Runs external tools with an optional timeout.
#[derive(Debug, Clone, Default)]
pub struct ToolRunner {
    timeout: Option<Duration>,
}

impl ToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run an FFmpeg command.
    pub async fn run_ffmpeg(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run("ffmpeg", cmd.build_args(), None).await.map(|_| ())
    }

    /// Run `program` with `args`, optionally inside `cwd`. Returns stdout.
    pub async fn run<I, S>(&self, program: &str, args: I, cwd: Option<&Path>) -> MediaResult<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let resolved = check_tool(program)?;
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        debug!(
            "Running {} {}",
            program,
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let mut command = Command::new(resolved);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        let mut child = command.spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_handle = tokio::spawn(async move {
            let mut collected = String::new();
            if let Some(out) = stdout {
                let mut lines = BufReader::new(out).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    collected.push_str(&line);
                    collected.push('\n');
                }
            }
            collected
        });

        let tool = program.to_string();
        let stderr_handle = tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            if let Some(err) = stderr {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(tool = %tool, "{}", line);
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let status = self.wait_for_completion(program, &mut child).await;
        let stdout = stdout_handle.await.unwrap_or_default();
        let stderr = stderr_handle.await.unwrap_or_default();

        match status? {
            Some(code) if code != 0 => Err(MediaError::command_failed(
                program,
                format!("exited with status {}", code),
                Some(stderr),
                Some(code),
            )),
            None => Err(MediaError::command_failed(
                program,
                "terminated by signal",
                Some(stderr),
                None,
            )),
            Some(_) => Ok(stdout),
        }
    }

    /// Wait for the child, honouring the timeout. Returns the exit code.
    async fn wait_for_completion(&self, program: &str, child: &mut Child) -> MediaResult<Option<i32>> {
        let Some(timeout) = self.timeout else {
            return Ok(child.wait().await?.code());
        };

        tokio::select! {
            status = child.wait() => Ok(status?.code()),
            _ = tokio::time::sleep(timeout) => {
                warn!("{} timed out after {} seconds, killing process", program, timeout.as_secs());
                let _ = child.kill().await;
                Err(MediaError::Timeout(timeout.as_secs()))
            }
        }
    }
}

/// Locate an executable on PATH (or accept an explicit path).
pub fn check_tool(program: &str) -> MediaResult<PathBuf> {
    which::which(program).map_err(|_| MediaError::ToolNotFound(program.to_string()))
}

/// Escape a path for use inside an FFmpeg filter argument.
pub fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_input_command() {
        let cmd = FfmpegCommand::new("out.mp4")
            .input("a.mp4")
            .input_with_args(["-stream_loop", "-1"], "b.mp4")
            .input("voice.wav")
            .filter_complex("[0:v][1:v]concat=n=2:v=1:a=0[v]")
            .map("[v]")
            .map("2:a")
            .video_codec("libx264")
            .crf(23);

        let args = cmd.build_args();
        assert_eq!(args[0], "-y");
        assert_eq!(cmd.input_count(), 3);
        let loop_pos = args.iter().position(|a| a == "-stream_loop").unwrap();
        assert_eq!(args[loop_pos + 3], "b.mp4");
        assert_eq!(args.last().unwrap(), "out.mp4");
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "2:a"));
    }

    #[test]
    fn test_escape_filter_path() {
        assert_eq!(
            escape_filter_path(Path::new("C:\\subs\\it's.srt")),
            "C\\:/subs/it\\'s.srt"
        );
    }

    #[tokio::test]
    async fn test_missing_tool_is_reported() {
        let err = ToolRunner::new()
            .run("storyreel-no-such-tool", ["--version"], None)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::ToolNotFound(_)));
        assert!(!err.is_transient());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_tool_is_killed_after_timeout() {
        let err = ToolRunner::new()
            .with_timeout(Duration::from_millis(100))
            .run("sleep", ["5"], None)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Timeout(_)));
        assert!(err.is_transient());
    }
}
