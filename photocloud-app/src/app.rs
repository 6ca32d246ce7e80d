use photocloud_data::{ImageFormat, ImageInput, PlyEncoding, PlyError, PlyHeader, decode_ply};
use photocloud_recon::DepthModel;
use photocloud_tasks::{ConfigError, ServiceConfig, Submission, TaskError, TaskOrchestrator, TaskStatus};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Ply(#[from] PlyError),

    #[error("Failed to serialize task status: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("No usable inputs: {0}")]
    NoInputs(String),

    #[error("Unsupported output '{0}': artifacts are PLY, use a .ply path")]
    UnsupportedOutput(PathBuf),

    #[error("Task failed ({kind}): {message}")]
    TaskFailed { kind: String, message: String },
}

fn io_error(path: &Path) -> impl (FnOnce(std::io::Error) -> AppError) + '_ {
    move |source| AppError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Options collected from the `run` subcommand.
pub struct RunOptions {
    pub inputs: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub model: Option<DepthModel>,
    pub no_sfm: bool,
    pub config: Option<PathBuf>,
    pub ascii: bool,
    pub storage_dir: Option<PathBuf>,
}

impl RunOptions {
    fn service_config(&self) -> Result<ServiceConfig, AppError> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::from_file(path)?,
            None => ServiceConfig::default(),
        };
        if let Some(model) = self.model {
            config.pipeline.depth_model = model;
        }
        if self.no_sfm {
            config.pipeline.enable_sfm = false;
        }
        if self.ascii {
            config.ply_encoding = PlyEncoding::Ascii;
        }
        if let Some(dir) = &self.storage_dir {
            config.storage_dir = dir.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png" | "ply"))
        .unwrap_or(false)
}

fn is_ply(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("ply"))
}

/// Artifacts are only ever PLY, so `-o` must name a `.ply` file.
fn check_output(output: Option<&Path>) -> Result<(), AppError> {
    match output {
        Some(path) if !is_ply(path) => Err(AppError::UnsupportedOutput(path.to_path_buf())),
        _ => Ok(()),
    }
}

/// Replace each directory with its supported files, sorted by name.
/// Explicit file arguments are kept in the order given.
pub fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, AppError> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = fs::read_dir(input)
                .map_err(io_error(input))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_supported(p))
                .collect();
            found.sort();
            if found.is_empty() {
                warn!("No images found in {}", input.display());
            }
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Build the submission for a list of files.
///
/// A lone `.ply` becomes an upload; anything else must be JPEG or PNG.
pub fn build_submission(files: &[PathBuf]) -> Result<Submission, AppError> {
    match files {
        [] => Err(AppError::NoInputs("nothing to reconstruct".to_string())),
        [single] if is_ply(single) => Ok(Submission::Ply {
            bytes: fs::read(single).map_err(io_error(single))?,
            filename: file_name(single),
        }),
        _ => {
            let mut images = Vec::with_capacity(files.len());
            for path in files {
                let name = file_name(path);
                let Some(format) = ImageFormat::from_filename(&name) else {
                    return Err(AppError::NoInputs(format!(
                        "'{name}' is not a JPEG or PNG image"
                    )));
                };
                let bytes = fs::read(path).map_err(io_error(path))?;
                images.push(ImageInput::new(bytes, format, name));
            }
            Ok(Submission::Images(images))
        }
    }
}

pub fn run(options: RunOptions) -> Result<(), AppError> {
    let config = options.service_config()?;
    check_output(options.output.as_deref())?;
    let files = expand_inputs(&options.inputs)?;
    let submission = build_submission(&files)?;
    info!("Submitting {} file(s)", files.len());

    let runtime = tokio::runtime::Runtime::new().map_err(AppError::Runtime)?;
    let view = runtime.block_on(async {
        let orchestrator = TaskOrchestrator::new(config)?;
        let id = orchestrator.submit(submission)?;
        let view = orchestrator.wait_for_terminal(id, POLL_INTERVAL).await?;

        if let (Some(output), Some(artifact)) = (&options.output, &view.artifact) {
            let bytes = orchestrator.fetch_artifact(artifact)?;
            fs::write(output, bytes).map_err(io_error(output))?;
            info!("Wrote {}", output.display());
        }
        Ok::<_, AppError>(view)
    })?;

    println!("{}", serde_json::to_string_pretty(&view)?);

    match (view.status, view.error) {
        (TaskStatus::Failed, Some(error)) => Err(AppError::TaskFailed {
            kind: error.kind.to_string(),
            message: error.message,
        }),
        _ => Ok(()),
    }
}

pub fn inspect(path: &Path) -> Result<(), AppError> {
    let bytes = fs::read(path).map_err(io_error(path))?;
    let (header, _) = PlyHeader::parse(&bytes)?;
    let cloud = decode_ply(&bytes)?;

    println!("file:     {}", path.display());
    println!("format:   {}", header.encoding.keyword());
    println!("vertices: {}", header.vertex_count());
    println!("faces:    {}", header.face_count());
    println!("colors:   {}", if cloud.has_colors() { "yes" } else { "no" });
    for comment in &header.comments {
        println!("comment:  {comment}");
    }
    if let Some((min, max)) = cloud.bounds() {
        println!("bounds:   [{:.3}, {:.3}, {:.3}] .. [{:.3}, {:.3}, {:.3}]", min.x, min.y, min.z, max.x, max.y, max.z);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"x").unwrap();
        path
    }

    #[test]
    fn test_expand_directory_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.PNG");
        touch(dir.path(), "a.jpg");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "c.jpeg");
        fs::create_dir(dir.path().join("nested.png")).unwrap();

        let files = expand_inputs(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<String> = files.iter().map(|p| file_name(p)).collect();
        assert_eq!(names, ["a.jpg", "b.PNG", "c.jpeg"]);
    }

    #[test]
    fn test_explicit_files_keep_order() {
        let dir = tempfile::tempdir().unwrap();
        let z = touch(dir.path(), "z.png");
        let a = touch(dir.path(), "a.png");
        let files = expand_inputs(&[z.clone(), a.clone()]).unwrap();
        assert_eq!(files, vec![z, a]);
    }

    #[test]
    fn test_single_ply_is_an_upload() {
        let dir = tempfile::tempdir().unwrap();
        let ply = touch(dir.path(), "scan.PLY");
        match build_submission(&[ply]).unwrap() {
            Submission::Ply { filename, bytes } => {
                assert_eq!(filename, "scan.PLY");
                assert_eq!(bytes, b"x");
            }
            other => panic!("unexpected submission {other:?}"),
        }
    }

    #[test]
    fn test_rejects_unknown_image_types() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "a.png");
        let b = touch(dir.path(), "b.gif");
        assert!(matches!(build_submission(&[a, b]), Err(AppError::NoInputs(_))));
        assert!(matches!(build_submission(&[]), Err(AppError::NoInputs(_))));
    }

    #[test]
    fn test_output_must_be_ply() {
        assert!(check_output(None).is_ok());
        assert!(check_output(Some(Path::new("out/cloud.PLY"))).is_ok());
        for bad in ["cloud.obj", "cloud", "cloud.ply.txt"] {
            assert!(
                matches!(check_output(Some(Path::new(bad))), Err(AppError::UnsupportedOutput(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_run_rejects_obj_output_before_submitting() {
        let dir = tempfile::tempdir().unwrap();
        let image = touch(dir.path(), "a.png");
        let options = RunOptions {
            inputs: vec![image],
            output: Some(dir.path().join("cloud.obj")),
            model: None,
            no_sfm: false,
            config: None,
            ascii: false,
            storage_dir: Some(dir.path().join("results")),
        };
        assert!(matches!(run(options), Err(AppError::UnsupportedOutput(_))));
        assert!(!dir.path().join("results").exists());
    }

    #[test]
    fn test_flags_override_config() {
        let options = RunOptions {
            inputs: Vec::new(),
            output: None,
            model: Some(DepthModel::Large),
            no_sfm: true,
            config: None,
            ascii: true,
            storage_dir: Some(PathBuf::from("out")),
        };
        let config = options.service_config().unwrap();
        assert_eq!(config.pipeline.depth_model, DepthModel::Large);
        assert!(!config.pipeline.enable_sfm);
        assert_eq!(config.ply_encoding, PlyEncoding::Ascii);
        assert_eq!(config.storage_dir, PathBuf::from("out"));
    }
}
