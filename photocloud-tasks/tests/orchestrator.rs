use glam::Vec3;
use image::{Rgb, RgbImage};
use photocloud_data::{
    ImageFormat, ImageInput, PlyEncoding, Point3D, PointCloud, ReconstructionMethod, decode_ply,
    encode_ply,
};
use photocloud_tasks::{
    ErrorKind, ServiceConfig, Submission, TaskError, TaskId, TaskOrchestrator, TaskStatus,
    TaskStatusView,
};
use std::collections::HashSet;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

const POLL: Duration = Duration::from_millis(10);

fn config(dir: &Path) -> ServiceConfig {
    ServiceConfig {
        storage_dir: dir.join("results"),
        ..Default::default()
    }
}

fn encode(image: &RgbImage, format: image::ImageFormat) -> Vec<u8> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
    bytes
}

/// Textured image with a checker pattern.
fn textured_png(seed: u8) -> ImageInput {
    let image = RgbImage::from_fn(64, 48, |x, y| {
        let v = if (x / 6 + y / 6) % 2 == 0 { 30 } else { 200 };
        Rgb([v, seed, 255 - v])
    });
    ImageInput::new(encode(&image, image::ImageFormat::Png), ImageFormat::Png, format!("tex{seed}.png"))
}

/// Smooth gradient without any corners.
fn gradient_png(seed: u8) -> ImageInput {
    let image = RgbImage::from_fn(96, 72, |x, y| Rgb([(x + u32::from(seed)) as u8, y as u8, 128]));
    ImageInput::new(encode(&image, image::ImageFormat::Png), ImageFormat::Png, format!("grad{seed}.png"))
}

/// Three shifted, rescaled 400x300 crops of one seeded block-noise texture.
fn overlapping_views() -> Vec<ImageInput> {
    let cols = 640 / 8 + 1;
    let mut state: u32 = 12345;
    let levels: Vec<u8> = (0..cols * (480 / 8 + 1))
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
            (state >> 16) as u8
        })
        .collect();
    let scene = RgbImage::from_fn(640, 480, |x, y| {
        let v = levels[((y / 8) * cols + x / 8) as usize];
        Rgb([v, v, v])
    });

    [(40, 30, 480, 360), (70, 45, 470, 352), (100, 60, 460, 345)]
        .into_iter()
        .enumerate()
        .map(|(i, (x, y, w, h))| {
            let crop = image::imageops::crop_imm(&scene, x, y, w, h).to_image();
            let view = image::imageops::resize(&crop, 400, 300, image::imageops::FilterType::Triangle);
            ImageInput::new(encode(&view, image::ImageFormat::Png), ImageFormat::Png, format!("view{i}.png"))
        })
        .collect()
}

async fn finish(orchestrator: &TaskOrchestrator, id: TaskId) -> TaskStatusView {
    tokio::time::timeout(Duration::from_secs(120), orchestrator.wait_for_terminal(id, POLL))
        .await
        .expect("task did not finish in time")
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_image_completes_with_monocular_cloud() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = TaskOrchestrator::new(config(dir.path())).unwrap();

    let id = orchestrator
        .submit(Submission::Images(vec![textured_png(1)]))
        .unwrap();
    let early = orchestrator.get_status(id).unwrap();
    assert!(matches!(
        early.status,
        TaskStatus::Queued | TaskStatus::Processing | TaskStatus::Completed
    ));
    assert_eq!(early.file_count, 1);

    let view = finish(&orchestrator, id).await;
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.method, Some(ReconstructionMethod::Monocular));
    let points = view.point_count.unwrap();
    assert!(points > 0);
    assert!(view.error.is_none());

    let bytes = orchestrator.fetch_artifact(view.artifact.as_ref().unwrap()).unwrap();
    let cloud = decode_ply(&bytes).unwrap();
    assert_eq!(cloud.len(), points);
    assert!(cloud.has_colors());

    // Terminal state stays put.
    let again = orchestrator.get_status(id).unwrap();
    assert_eq!(again.status, TaskStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overlapping_views_complete_with_sfm() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = TaskOrchestrator::new(config(dir.path())).unwrap();

    let id = orchestrator
        .submit(Submission::Images(overlapping_views()))
        .unwrap();
    let view = finish(&orchestrator, id).await;

    assert_eq!(view.status, TaskStatus::Completed, "{:?}", view.error);
    assert_eq!(view.method, Some(ReconstructionMethod::Sfm));
    assert_eq!(view.file_count, 3);
    let points = view.point_count.unwrap();
    assert!(points >= 100);
    assert!(!view.warnings.iter().any(|w| w.contains("monocular")));

    let bytes = orchestrator.fetch_artifact(view.artifact.as_ref().unwrap()).unwrap();
    let cloud = decode_ply(&bytes).unwrap();
    assert_eq!(cloud.len(), points);
    assert!(cloud.has_colors());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn textureless_pair_falls_back_to_monocular() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = TaskOrchestrator::new(config(dir.path())).unwrap();

    let id = orchestrator
        .submit(Submission::Images(vec![gradient_png(0), gradient_png(40)]))
        .unwrap();
    let view = finish(&orchestrator, id).await;

    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.method, Some(ReconstructionMethod::Monocular));
    assert_eq!(view.file_count, 2);
    assert!(view.point_count.unwrap() > 0);
    assert!(view.warnings.iter().any(|w| w.contains("monocular")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_tasks_get_distinct_ids_and_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = TaskOrchestrator::new(config(dir.path())).unwrap();

    let ids: Vec<TaskId> = (0..6u8)
        .map(|i| {
            orchestrator
                .submit(Submission::Images(vec![textured_png(i * 10)]))
                .unwrap()
        })
        .collect();
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 6);

    let mut artifacts = HashSet::new();
    for id in &ids {
        let view = finish(&orchestrator, *id).await;
        assert_eq!(view.status, TaskStatus::Completed);
        assert_eq!(view.task_id, *id);
        artifacts.insert(view.artifact.unwrap());
    }
    assert_eq!(artifacts.len(), 6);

    let stored = std::fs::read_dir(dir.path().join("results")).unwrap().count();
    assert_eq!(stored, 6);
}

#[tokio::test]
async fn unknown_task_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = TaskOrchestrator::new(config(dir.path())).unwrap();
    let missing = TaskId::new();
    assert!(matches!(
        orchestrator.get_status(missing),
        Err(TaskError::UnknownTask(id)) if id == missing
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ply_upload_is_stored_as_received() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = TaskOrchestrator::new(config(dir.path())).unwrap();

    let mut cloud = PointCloud::new(vec![
        Point3D::new(Vec3::new(0.0, 0.0, 1.0), [255, 0, 0]),
        Point3D::new(Vec3::new(1.0, 0.0, 1.0), [0, 255, 0]),
        Point3D::new(Vec3::new(0.0, 1.0, 1.0), [0, 0, 255]),
    ]);
    cloud.faces.push([0, 1, 2]);
    let bytes = encode_ply(&cloud, PlyEncoding::Ascii).unwrap();

    let id = orchestrator
        .submit(Submission::Ply {
            bytes: bytes.clone(),
            filename: "mesh.ply".to_string(),
        })
        .unwrap();
    let view = finish(&orchestrator, id).await;

    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.method, Some(ReconstructionMethod::Upload));
    assert_eq!(view.point_count, Some(3));
    let stored = orchestrator.fetch_artifact(view.artifact.as_ref().unwrap()).unwrap();
    assert_eq!(stored, bytes);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_ply_upload_fails() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = TaskOrchestrator::new(config(dir.path())).unwrap();

    let bytes = b"ply\nformat ascii 1.0\nelement vertex 3\nproperty float x\nproperty float y\nproperty float z\nend_header\n0 0 0\n1 1 1\n".to_vec();
    let id = orchestrator
        .submit(Submission::Ply {
            bytes,
            filename: "short.ply".to_string(),
        })
        .unwrap();
    let view = finish(&orchestrator, id).await;

    assert_eq!(view.status, TaskStatus::Failed);
    assert!(view.artifact.is_none());
    let error = view.error.unwrap();
    assert_eq!(error.kind, ErrorKind::MalformedPly);
    assert!(error.message.contains("short.ply"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn corrupt_image_fails_with_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = TaskOrchestrator::new(config(dir.path())).unwrap();

    let corrupt = ImageInput::new(vec![0xFF, 0xD8, 0x00, 0x01], ImageFormat::Jpeg, "broken.jpg");
    let id = orchestrator
        .submit(Submission::Images(vec![textured_png(1), corrupt]))
        .unwrap();
    let view = finish(&orchestrator, id).await;

    assert_eq!(view.status, TaskStatus::Failed);
    assert_eq!(view.error.unwrap().kind, ErrorKind::ImageDecode);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ascii_artifacts_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServiceConfig {
        ply_encoding: PlyEncoding::Ascii,
        ..config(dir.path())
    };
    let orchestrator = TaskOrchestrator::new(config).unwrap();

    let id = orchestrator
        .submit(Submission::Images(vec![textured_png(7)]))
        .unwrap();
    let view = finish(&orchestrator, id).await;
    let bytes = orchestrator.fetch_artifact(view.artifact.as_ref().unwrap()).unwrap();
    assert!(bytes.starts_with(b"ply\nformat ascii 1.0\n"));
}

#[tokio::test]
async fn empty_submissions_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = TaskOrchestrator::new(config(dir.path())).unwrap();
    assert!(matches!(
        orchestrator.submit(Submission::Images(Vec::new())),
        Err(TaskError::InvalidSubmission(_))
    ));
    assert!(orchestrator.registry().is_empty());
}

#[test]
fn orchestrator_requires_a_runtime() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        TaskOrchestrator::new(config(dir.path())),
        Err(TaskError::NoRuntime)
    ));
}
