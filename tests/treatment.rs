use std::f64::consts::PI;
use zebra_gait::analysis::treater::AngleSeries;
use zebra_gait::config::TimeBase;
use zebra_gait::core_modules::geometry::{Point, Skeleton};
use zebra_gait::storage::{self, SkeletonStore};
use zebra_gait::{ExperimentLayout, GaitConfig, GaitError, Session};

const FPS: f64 = 100.0;

/// A fish whose rear two thirds swing around the joint, `offset` px at the tail tip.
fn beating_skeleton(offset: f64) -> Skeleton {
    let points = (0..=180)
        .map(|x| {
            let bend = if x <= 60 { 0.0 } else { offset * (x - 60) as f64 / 120.0 };
            Point::new(x, 50 + bend.round() as i32)
        })
        .collect();
    Skeleton::new(points)
}

fn treatment_config() -> GaitConfig {
    let mut config = GaitConfig::default();
    config.kinematics.time_base = TimeBase::FramePeriod;
    // Pixel rounding flattens the peaks into short plateaus.
    config.oscillation.smoothing_window = 5;
    config.oscillation.knot_stride = 2;
    config.oscillation.noise_time_ms = 150.0;
    config.oscillation.noise_value_ratio = 0.2;
    config
}

/// Two seconds of a 1 Hz tail beat, every tenth frame lost to a failed extraction.
fn write_beating_run(layout: &ExperimentLayout) {
    let store = SkeletonStore::create(layout.clone()).expect("store");
    for frame_index in 0..200 {
        if frame_index % 10 == 5 {
            store.write_invalid(frame_index).expect("sentinel");
        } else {
            let t = frame_index as f64 / FPS;
            store
                .write_valid(frame_index, &beating_skeleton(40.0 * (2.0 * PI * t).sin()))
                .expect("record");
        }
    }
}

#[tokio::test]
async fn tail_beat_frequency_is_recovered() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = ExperimentLayout::new(dir.path(), "beat");
    write_beating_run(&layout);

    let session = Session::new(treatment_config(), layout.clone()).expect("session");
    let report = session.treat(FPS).await.expect("treat");

    assert_eq!(report.series.len(), 180);
    assert!(!report.series.frame_indices.contains(&5));
    assert_eq!(report.summaries.len(), 3);

    let (_, beta) = report
        .summaries
        .iter()
        .find(|(which, _)| *which == AngleSeries::Beta)
        .expect("beta analysed");
    assert!(beta.is_determined(), "{beta:?}");
    assert!((beta.frequency_hz - 1.0).abs() < 0.2, "{beta:?}");
    assert!(beta.mean_amplitude > 10.0 && beta.mean_amplitude < 25.0, "{beta:?}");

    let csv = std::fs::read_to_string(layout.csv_path()).expect("csv");
    let mut lines = csv.lines();
    assert!(lines.next().expect("header").starts_with("time(ms),head_x,head_y"));
    assert_eq!(csv.lines().filter(|l| l.starts_with("summary,")).count(), 3);

    let beta_series = storage::read_series(&layout.series_path("beta")).expect("beta series");
    assert_eq!(beta_series, report.series.beta);
}

#[tokio::test]
async fn single_point_skeleton_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = ExperimentLayout::new(dir.path(), "degenerate");
    {
        let store = SkeletonStore::create(layout.clone()).expect("store");
        store.write_valid(0, &beating_skeleton(0.0)).expect("record");
        store.write_valid(1, &Skeleton::new(vec![Point::new(3, 3)])).expect("record");
    }

    let session = Session::new(GaitConfig::default(), layout).expect("session");
    let err = session.treat(FPS).await.err().expect("degenerate");
    assert!(matches!(err, GaitError::DegenerateSkeleton { frame_index: Some(1), .. }));
}
