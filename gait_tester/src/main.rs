use image::RgbImage;
use opencv::{
    core::{self, Mat, Scalar},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use std::env;
use std::sync::Arc;
use tracing::{info, warn};
use zebra_gait::core_modules::geometry::Rect;
use zebra_gait::video::{Frame, FrameReader, FrameSink, VideoInput, VideoOutput};
use zebra_gait::{CancelHandle, ExperimentLayout, ExtractionRequest, GaitConfig, GaitError, Session};

fn main() -> anyhow::Result<()> {
    // --- 1. Argument Parsing & Setup ---
    let args: Vec<String> = env::args().collect();
    if args.len() < 5 {
        println!("Usage: gait_tester <input_video_path> <output_video_path> <export_dir> <exp_id> [x,y,width,height]");
        return Ok(());
    }
    let input_path = &args[1];
    let output_path = &args[2];
    let layout = ExperimentLayout::new(&args[3], &args[4]);
    let roi = match args.get(5) {
        Some(arg) => Some(parse_roi(arg)?),
        None => None,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // --- 2. Video I/O Initialization ---
    let cap = VideoCapture::from_file(input_path, videoio::CAP_ANY)?;
    if !cap.is_opened()? {
        anyhow::bail!("Error opening video file {input_path}");
    }
    let fps = cap.get(videoio::CAP_PROP_FPS)?;
    drop(cap);

    let video = CvVideo {
        path: input_path.clone(),
    };
    let output = CvVideoOutput {
        path: output_path.clone(),
    };

    // --- 3. Session & Cancellation ---
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let session = Session::new(GaitConfig::default(), layout)?;
        let (cancel_handle, cancel) = CancelHandle::new();
        tokio::spawn(async move {
            // First interrupt stops after the current frame, the second leaves at once.
            let mut received = 0usize;
            while tokio::signal::ctrl_c().await.is_ok() {
                received += 1;
                if received > 1 {
                    warn!("second interrupt received, exiting");
                    std::process::exit(130);
                }
                warn!("interrupt received, stopping after the current frame (interrupt again to exit now)");
                cancel_handle.cancel();
            }
        });

        let request = ExtractionRequest {
            video: Arc::new(video),
            output: Arc::new(output),
            roi,
            roi_selector: None,
            contrast_selector: None,
            fps,
        };

        // --- 4. Extraction & Treatment ---
        let (summary, report) = session.run(request, cancel).await?;
        info!(?summary, "extraction done");
        for (which, oscillation) in &report.summaries {
            println!(
                "{:>5}: amplitude {:.2} deg, frequency {:.2} Hz ({} extrema)",
                which.name(),
                oscillation.mean_amplitude,
                oscillation.frequency_hz,
                oscillation.extrema
            );
        }
        anyhow::Ok(())
    })?;

    println!("Processing complete. Annotated video saved to {}", output_path);
    Ok(())
}

fn parse_roi(arg: &str) -> anyhow::Result<Rect> {
    let parts: Vec<i64> = arg
        .split(',')
        .map(|p| p.trim().parse::<i64>())
        .collect::<Result<_, _>>()?;
    let [x, y, w, h] = parts[..] else {
        anyhow::bail!("expected x,y,width,height, got `{arg}`");
    };
    Ok(Rect::new(x as i32, y as i32, w.max(0) as u32, h.max(0) as u32))
}

fn cv_error(e: opencv::Error) -> GaitError {
    GaitError::Io(std::io::Error::other(e.to_string()))
}

/// A video container decoded by OpenCV.
struct CvVideo {
    path: String,
}

impl VideoInput for CvVideo {
    fn name(&self) -> String {
        self.path.clone()
    }

    fn open(&self) -> zebra_gait::Result<Box<dyn FrameReader>> {
        let open_error = |reason: String| GaitError::VideoOpen {
            source_name: self.path.clone(),
            reason,
        };
        let cap = VideoCapture::from_file(&self.path, videoio::CAP_ANY).map_err(|e| open_error(e.to_string()))?;
        if !cap.is_opened().map_err(|e| open_error(e.to_string()))? {
            return Err(open_error("the decoder refused the file".into()));
        }
        let frame_count = cap.get(videoio::CAP_PROP_FRAME_COUNT).map_err(cv_error)?.max(0.0) as usize;
        Ok(Box::new(CvFrameReader { cap, frame_count }))
    }
}

struct CvFrameReader {
    cap: VideoCapture,
    frame_count: usize,
}

impl FrameReader for CvFrameReader {
    fn frame_count(&self) -> usize {
        self.frame_count
    }

    fn read_frame(&mut self) -> zebra_gait::Result<Option<Frame>> {
        let mut bgr = Mat::default();
        if !self.cap.read(&mut bgr).map_err(cv_error)? || bgr.empty() {
            return Ok(None);
        }

        // Convert the OpenCV Mat (BGR) to the RGB buffer the pipeline expects.
        let mut rgb = Mat::default();
        imgproc::cvt_color(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0).map_err(cv_error)?;
        let bytes = rgb.data_bytes().map_err(cv_error)?.to_vec();
        let frame = RgbImage::from_raw(rgb.cols() as u32, rgb.rows() as u32, bytes)
            .ok_or_else(|| cv_error(opencv::Error::new(core::StsBadSize, "frame buffer size mismatch")))?;
        Ok(Some(frame))
    }
}

/// Annotated frames encoded to an MJPG container.
struct CvVideoOutput {
    path: String,
}

impl VideoOutput for CvVideoOutput {
    fn create(&self, width: u32, height: u32, fps: f64) -> zebra_gait::Result<Box<dyn FrameSink>> {
        let fourcc = VideoWriter::fourcc('M', 'J', 'P', 'G').map_err(cv_error)?;
        let writer = VideoWriter::new(
            &self.path,
            fourcc,
            fps,
            core::Size::new(width as i32, height as i32),
            true,
        )
        .map_err(cv_error)?;
        Ok(Box::new(CvFrameSink { writer }))
    }
}

struct CvFrameSink {
    writer: VideoWriter,
}

impl FrameSink for CvFrameSink {
    fn write_frame(&mut self, frame: &Frame) -> zebra_gait::Result<()> {
        let mut rgb = Mat::new_rows_cols_with_default(
            frame.height() as i32,
            frame.width() as i32,
            core::CV_8UC3,
            Scalar::all(0.0),
        )
        .map_err(cv_error)?;
        rgb.data_bytes_mut().map_err(cv_error)?.copy_from_slice(frame.as_raw());

        let mut bgr = Mat::default();
        imgproc::cvt_color(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR, 0).map_err(cv_error)?;
        self.writer.write(&bgr).map_err(cv_error)
    }

    fn finish(&mut self) -> zebra_gait::Result<()> {
        self.writer.release().map_err(cv_error)
    }
}
