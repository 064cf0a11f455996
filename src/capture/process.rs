//! External process supervision
//!
//! Each capture session owns one child process. A background task pumps its
//! stdout through a [`StreamDecoder`], forwards stderr to the log and reports
//! the exit status once the stream ends.

use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::session::Emitter;
use crate::bitstream::UnitScanner;
use crate::error::{CaptureError, Result};
use crate::framing::FrameAssembler;
use crate::types::{Codec, FrameFormat, PixelLayout};

/// Size of a single stdout read.
const READ_CHUNK: usize = 64 * 1024;

/// Turns stdout bytes into deliverable frames.
pub(crate) enum StreamDecoder {
    /// Fixed-size raw frames.
    Frames {
        assembler: FrameAssembler,
        layout: PixelLayout,
    },
    /// Start-code delimited coded units.
    Units(UnitScanner),
    /// Output goes elsewhere; stdout is drained and ignored.
    Discard,
}

impl StreamDecoder {
    pub(crate) fn raw(layout: PixelLayout, width: u32, height: u32) -> Self {
        StreamDecoder::Frames {
            assembler: FrameAssembler::new(layout.frame_size(width, height)),
            layout,
        }
    }

    pub(crate) fn units(codec: Codec) -> Self {
        StreamDecoder::Units(UnitScanner::new(codec))
    }

    fn push(&mut self, chunk: &[u8], emitter: &mut Emitter) {
        match self {
            StreamDecoder::Frames { assembler, layout } => {
                for frame in assembler.push(chunk) {
                    emitter.deliver(frame, FrameFormat::Pixel(*layout), None);
                }
            }
            StreamDecoder::Units(scanner) => {
                let codec = scanner.codec();
                for unit in scanner.feed(chunk) {
                    emitter.deliver(unit.data, FrameFormat::Encoded(codec), Some(unit.keyframe));
                }
            }
            StreamDecoder::Discard => {}
        }
    }

    fn finish(&mut self, emitter: &mut Emitter) {
        match self {
            StreamDecoder::Frames { assembler, .. } => {
                let dropped = assembler.clear();
                if dropped > 0 {
                    debug!("dropping {} bytes of incomplete trailing frame", dropped);
                }
            }
            StreamDecoder::Units(scanner) => {
                let codec = scanner.codec();
                if let Some(unit) = scanner.flush() {
                    emitter.deliver(unit.data, FrameFormat::Encoded(codec), Some(unit.keyframe));
                }
            }
            StreamDecoder::Discard => {}
        }
    }
}

/// Owning handle to a running capture process.
///
/// Dropping the handle terminates the process.
pub(crate) struct ProcessHandle {
    program: String,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl ProcessHandle {
    pub(crate) fn spawn(
        mut command: Command,
        program: &str,
        decoder: StreamDecoder,
        emitter: Emitter,
    ) -> Result<Self> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| CaptureError::launch(program, &e))?;
        info!("{} started (pid {:?})", program, child.id());

        let stdout = child.stdout.take().ok_or_else(|| CaptureError::Launch {
            program: program.to_string(),
            reason: "stdout was not captured".to_string(),
        })?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(program.to_string(), stderr));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(supervise(
            child,
            stdout,
            decoder,
            emitter,
            kill_rx,
            program.to_string(),
        ));

        Ok(Self {
            program: program.to_string(),
            kill_tx: Some(kill_tx),
        })
    }

    /// Signal the process to die. Does not wait for it to exit.
    pub(crate) fn terminate(mut self) {
        self.signal();
    }

    fn signal(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            debug!("terminating {}", self.program);
            let _ = tx.send(());
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.signal();
    }
}

async fn supervise(
    mut child: Child,
    stdout: ChildStdout,
    mut decoder: StreamDecoder,
    mut emitter: Emitter,
    mut kill_rx: oneshot::Receiver<()>,
    program: String,
) {
    let pumped = tokio::select! {
        _ = &mut kill_rx => None,
        result = pump(stdout, &mut decoder, &mut emitter) => Some(result),
    };

    let Some(read_result) = pumped else {
        kill(&mut child, &program).await;
        return;
    };

    decoder.finish(&mut emitter);
    if let Err(e) = read_result {
        emitter.error(CaptureError::Stream(e.to_string()));
    }

    let status = tokio::select! {
        _ = &mut kill_rx => {
            kill(&mut child, &program).await;
            return;
        }
        status = child.wait() => status,
    };

    match status {
        Ok(status) => report_exit(&program, status, &emitter),
        Err(e) => emitter.error(CaptureError::Stream(e.to_string())),
    }
    emitter.mark_idle();
}

async fn pump(
    mut stdout: ChildStdout,
    decoder: &mut StreamDecoder,
    emitter: &mut Emitter,
) -> std::io::Result<()> {
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = stdout.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        decoder.push(&chunk[..n], emitter);
    }
}

async fn kill(child: &mut Child, program: &str) {
    if let Err(e) = child.start_kill() {
        debug!("{} already gone: {}", program, e);
    }
    // Reap so the child does not linger as a zombie.
    let _ = child.wait().await;
    debug!("{} terminated", program);
}

fn report_exit(program: &str, status: ExitStatus, emitter: &Emitter) {
    if status.success() {
        info!(
            "{} finished, stream ended after {} frames",
            program,
            emitter.delivered()
        );
        return;
    }
    warn!("{} exited unexpectedly: {}", program, status);
    emitter.error(CaptureError::ProcessExited {
        program: program.to_string(),
        status: status.to_string(),
    });
}

async fn log_stderr(program: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.contains("ERROR") || line.contains("WARNING") || line.contains("error") {
            warn!("{}: {}", program, line);
        } else {
            debug!("{}: {}", program, line);
        }
    }
}

/// Run a short-lived tool to completion, returning `(status, stdout, stderr)`.
pub(crate) async fn run_tool(program: &str, args: &[String]) -> Result<(ExitStatus, String, String)> {
    debug!("running {} {:?}", program, args);
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| CaptureError::launch(program, &e))?;
    Ok((
        output.status,
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    ))
}
