//! Pipeline backend driven through stand-in runner scripts
//!
//! The scripts ignore the pipeline description and write canned bytes to
//! stdout, which exercises frame reassembly, the recording-only compressed
//! mode, exit reporting and codec restarts without GStreamer installed.

mod support;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use support::{printf, printf_in_pieces, script, tool_dir, wait_for_lines, wait_idle, WAIT};
use vidcap::capture::PipelineAdapter;
use vidcap::config::PipelineSettings;
use vidcap::{CaptureAdapter, CaptureConfig, CaptureError, Codec, FrameData, FrameFormat, PixelLayout};

/// 4x2 YUYV, 16 bytes per frame.
const FRAME: usize = 16;

struct Tools {
    /// Two and a half frames in odd-sized writes, then a clean exit.
    raw: PathBuf,
    /// Some bytes on stdout, then a clean exit.
    recorder: PathBuf,
    /// Exits with status 3.
    crash: PathBuf,
    /// Logs its arguments, writes one frame and keeps running.
    steady: PathBuf,
    steady_log: PathBuf,
}

/// Distinct bytes that stay clear of shell and `printf` metacharacters.
fn stream() -> Vec<u8> {
    (0..(FRAME * 5 / 2) as u8).map(|i| 0xA0 + i).collect()
}

fn tools() -> &'static Tools {
    static TOOLS: OnceLock<Tools> = OnceLock::new();
    TOOLS.get_or_init(|| {
        let dir = tool_dir("gst");
        let steady_log = dir.join("steady.log");
        let _ = std::fs::remove_file(&steady_log);
        Tools {
            raw: script(&dir, "raw", &printf_in_pieces(&stream(), &[7, 13])),
            recorder: script(
                &dir,
                "recorder",
                &format!("{}\nsleep 0.2", printf(&[0, 0, 0, 1, 0x65, 0x88, 0, 0, 0, 1, 0x41])),
            ),
            crash: script(&dir, "crash", "printf 'abc'\nexit 3"),
            steady: script(
                &dir,
                "steady",
                &format!(
                    "{}\n{}\nexec sleep 30",
                    support::log_args(&steady_log),
                    printf(&[0x80; FRAME])
                ),
            ),
            steady_log,
        }
    })
}

fn runner(launch_bin: &std::path::Path) -> PipelineAdapter {
    PipelineAdapter::new(PipelineSettings {
        launch_bin: launch_bin.to_string_lossy().into_owned(),
        ..Default::default()
    })
}

fn tiny() -> CaptureConfig {
    CaptureConfig::new("/dev/video0", 4, 2, 30)
}

fn collect_frames(adapter: &PipelineAdapter) -> Arc<Mutex<Vec<FrameData>>> {
    let frames: Arc<Mutex<Vec<FrameData>>> = Arc::default();
    let sink = Arc::clone(&frames);
    adapter.on_frame(Arc::new(move |frame: FrameData| sink.lock().unwrap().push(frame)));
    frames
}

fn collect_errors(adapter: &PipelineAdapter) -> Arc<Mutex<Vec<CaptureError>>> {
    let errors: Arc<Mutex<Vec<CaptureError>>> = Arc::default();
    let sink = Arc::clone(&errors);
    adapter.on_error(Arc::new(move |err: CaptureError| sink.lock().unwrap().push(err)));
    errors
}

#[tokio::test(flavor = "multi_thread")]
async fn raw_frames_are_reassembled_from_odd_writes() {
    let tools = tools();
    let mut adapter = runner(&tools.raw);
    let frames = collect_frames(&adapter);
    let errors = collect_errors(&adapter);

    adapter.start_capture(tiny()).await.unwrap();
    wait_idle(&adapter).await;

    let frames = frames.lock().unwrap();
    let stream = stream();
    assert_eq!(frames.len(), 2);
    assert_eq!(&frames[0].data[..], &stream[..FRAME]);
    assert_eq!(&frames[1].data[..], &stream[FRAME..2 * FRAME]);
    for frame in frames.iter() {
        assert_eq!(frame.format, FrameFormat::Pixel(PixelLayout::Yuyv));
        assert_eq!((frame.width, frame.height), (4, 2));
        assert_eq!(frame.keyframe, None);
    }
    // The trailing half frame is dropped and a clean exit is not an error.
    assert!(errors.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn compressed_session_only_records() {
    let tools = tools();
    let mut adapter = runner(&tools.recorder);
    let frames = collect_frames(&adapter);
    let errors = collect_errors(&adapter);

    adapter.start_capture(tiny().with_codec(Codec::H264)).await.unwrap();
    wait_idle(&adapter).await;

    assert!(frames.lock().unwrap().is_empty());
    assert!(errors.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn runner_exit_is_reported_and_goes_idle() {
    let tools = tools();
    let mut adapter = runner(&tools.crash);
    let errors = collect_errors(&adapter);

    adapter.start_capture(tiny()).await.unwrap();
    wait_idle(&adapter).await;

    let program = tools.crash.to_string_lossy().into_owned();
    let errors = errors.lock().unwrap().clone();
    assert_eq!(errors.len(), 1);
    assert!(matches!(&errors[0], CaptureError::ProcessExited { program: p, .. } if *p == program));

    // The configuration survives the exit and a new start is accepted.
    assert_eq!(adapter.config(), Some(&tiny()));
    adapter.start_capture(tiny()).await.unwrap();
    adapter.stop_capture().await;
    assert!(!adapter.is_capturing());
}

#[tokio::test(flavor = "multi_thread")]
async fn codec_change_relaunches_the_runner() {
    let tools = tools();
    let mut adapter = runner(&tools.steady);
    let frames = collect_frames(&adapter);

    adapter.start_capture(tiny()).await.unwrap();
    tokio::time::timeout(WAIT, async {
        while frames.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("no raw frame before the codec change");

    adapter.set_codec(Codec::H264).await.unwrap();
    assert!(adapter.is_capturing());
    assert_eq!(adapter.config().map(|c| c.codec), Some(Codec::H264));

    let launches = wait_for_lines(&tools.steady_log, 2).await;
    assert!(launches[0].contains("fdsink fd=1"));
    assert!(launches[1].contains("x264enc"));
    assert!(launches[1].contains("mpegtsmux"));

    // The relaunched runner records instead of streaming.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(frames.lock().unwrap().len(), 1);

    adapter.stop_capture().await;
    assert!(!adapter.is_capturing());

    // Idle changes only touch the stored configuration.
    adapter.set_resolution(8, 4).await.unwrap();
    assert_eq!(adapter.config().map(|c| (c.width, c.height)), Some((8, 4)));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(support::logged(&tools.steady_log).len(), 2);
}
