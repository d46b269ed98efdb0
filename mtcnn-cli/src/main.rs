use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use serde::Serialize;
use walkdir::WalkDir;

use mtcnn_core::{FaceAnnotation, MtcnnDetector, TractEvaluator, align_face, AreaResizer};
use mtcnn_utils::{config::AppSettings, image_to_hwc, hwc_to_rgb_image, init_logging, load_image, normalize_path};

/// Run MTCNN face detection over images or directories.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct DetectArgs {
    /// Path to an image file or a directory containing images.
    #[arg(short, long)]
    input: PathBuf,

    /// Path to the proposal network (stage 1) ONNX graph.
    #[arg(long, default_value = "models/pnet.onnx")]
    proposal_model: PathBuf,

    /// Path to the refinement network (stage 2) ONNX graph.
    #[arg(long, default_value = "models/rnet.onnx")]
    refinement_model: PathBuf,

    /// Path to the output network (stage 3) ONNX graph.
    #[arg(long, default_value = "models/onet.onnx")]
    output_model: PathBuf,

    /// Optional settings JSON (defaults to built-in MTCNN parameters).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the minimum detectable face size in pixels.
    #[arg(long)]
    min_face_size: Option<u32>,

    /// Override the pyramid scale factor.
    #[arg(long)]
    scale_factor: Option<f32>,

    /// Override the three stage thresholds, e.g. `--thresholds 0.6 0.7 0.7`.
    #[arg(long, num_args = 3)]
    thresholds: Option<Vec<f32>>,

    /// Enable telemetry timing logs.
    #[arg(long)]
    telemetry: bool,

    /// Write detections to a JSON file instead of stdout.
    #[arg(long)]
    json: Option<PathBuf>,

    /// Directory to write annotated images with boxes and landmarks overlaid.
    #[arg(long)]
    annotate: Option<PathBuf>,

    /// Directory to write margin-expanded aligned face crops.
    #[arg(long)]
    align: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ImageDetections {
    image: String,
    faces: Vec<FaceAnnotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    annotated: Option<String>,
}

fn main() -> Result<()> {
    init_logging(log::LevelFilter::Info)?;
    let args = DetectArgs::parse();

    let input_path = normalize_path(&args.input)?;
    let annotate_dir = prepare_dir(args.annotate.as_ref())?;
    let align_dir = prepare_dir(args.align.as_ref())?;

    let mut settings = load_settings(args.config.as_ref())?;
    apply_cli_overrides(&mut settings, &args);
    mtcnn_utils::configure_telemetry(
        args.telemetry || settings.telemetry.enabled,
        settings.telemetry.level_filter(),
    );

    info!(
        "Loading stage networks: {} / {} / {}",
        args.proposal_model.display(),
        args.refinement_model.display(),
        args.output_model.display()
    );
    let evaluator = TractEvaluator::from_paths(
        &args.proposal_model,
        &args.refinement_model,
        &args.output_model,
    )?;
    let detector = MtcnnDetector::new(Arc::new(evaluator), (&settings.cascade).into())?;

    let images = collect_images(&input_path)?;
    if images.is_empty() {
        anyhow::bail!(
            "no images found at {} (supported extensions: jpg, jpeg, png, bmp, webp)",
            input_path.display()
        );
    }

    info!("Processing {} image(s)...", images.len());
    let mut results = Vec::with_capacity(images.len());
    for image_path in images {
        match process_image(&detector, &image_path, &settings, annotate_dir.as_deref(), align_dir.as_deref()) {
            Ok(record) => results.push(record),
            Err(err) => warn!("Failed to process {}: {err}", image_path.display()),
        }
    }

    if results.is_empty() {
        anyhow::bail!("all detections failed; cannot produce output");
    }

    if let Some(json_path) = args.json.as_ref() {
        if let Some(dir) = json_path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }
        let file = File::create(json_path)
            .with_context(|| format!("failed to create {}", json_path.display()))?;
        serde_json::to_writer_pretty(file, &results).with_context(|| {
            format!("failed to write detection JSON to {}", json_path.display())
        })?;
        info!("Wrote detections to {}", json_path.display());
    } else {
        let json =
            serde_json::to_string_pretty(&results).context("failed to serialize detections")?;
        println!("{json}");
    }

    Ok(())
}

fn process_image(
    detector: &MtcnnDetector,
    image_path: &Path,
    settings: &AppSettings,
    annotate_dir: Option<&Path>,
    align_dir: Option<&Path>,
) -> Result<ImageDetections> {
    let image = load_image(image_path)?;
    let tensor = image_to_hwc(&image);
    let faces = detector.detect(&tensor)?;
    info!("{} -> {} face(s)", image_path.display(), faces.len());

    let annotated = if let Some(dir) = annotate_dir {
        match annotate_image(image_path, &image, &faces, dir) {
            Ok(path) => {
                info!("Annotated image saved to {}", path.display());
                Some(path.display().to_string())
            }
            Err(err) => {
                warn!("Failed to annotate {}: {err}", image_path.display());
                None
            }
        }
    } else {
        None
    };

    if let Some(dir) = align_dir {
        for (index, face) in faces.iter().enumerate() {
            let crop = align_face(
                tensor.view(),
                face,
                settings.align.margin,
                settings.align.size,
                // Pre-whitened tensors are for embedding models, not image
                // files; exported crops stay in pixel range.
                false,
                &AreaResizer,
            )?;
            let crop_image = hwc_to_rgb_image(&crop)?;
            let stem = image_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("face");
            let crop_path = dir.join(format!("{stem}_face{index}.png"));
            crop_image
                .save(&crop_path)
                .with_context(|| format!("failed to save aligned crop {}", crop_path.display()))?;
            debug!("Aligned crop saved to {}", crop_path.display());
        }
    }

    Ok(ImageDetections {
        image: image_path.display().to_string(),
        faces,
        annotated,
    })
}

fn prepare_dir(dir: Option<&PathBuf>) -> Result<Option<PathBuf>> {
    match dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
            Ok(Some(normalize_path(dir)?))
        }
        None => Ok(None),
    }
}

fn load_settings(config_path: Option<&PathBuf>) -> Result<AppSettings> {
    if let Some(path) = config_path {
        let resolved = normalize_path(path)?;
        AppSettings::load_from_path(&resolved)
    } else {
        Ok(AppSettings::default())
    }
}

fn apply_cli_overrides(settings: &mut AppSettings, args: &DetectArgs) {
    if let Some(min_face_size) = args.min_face_size {
        settings.cascade.min_face_size = min_face_size;
    }
    if let Some(scale_factor) = args.scale_factor {
        settings.cascade.scale_factor = scale_factor;
    }
    if let Some(thresholds) = args.thresholds.as_ref() {
        if let [t1, t2, t3] = thresholds[..] {
            settings.cascade.thresholds = [t1, t2, t3];
        }
    }
    if args.telemetry {
        settings.telemetry.enabled = true;
    }
}

fn collect_images(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    if !path.is_dir() {
        anyhow::bail!(
            "input path is neither file nor directory: {}",
            path.display()
        );
    }

    let exts = ["jpg", "jpeg", "png", "bmp", "webp"];
    let mut images = Vec::new();
    for entry in WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        if let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) {
            let ext_lower = ext.to_ascii_lowercase();
            if exts.contains(&ext_lower.as_str()) {
                images.push(entry.path().to_path_buf());
            } else {
                debug!("Skipping non-image file {}", entry.path().display());
            }
        }
    }
    images.sort();
    Ok(images)
}

fn annotate_image(
    image_path: &Path,
    image: &image::DynamicImage,
    faces: &[FaceAnnotation],
    output_dir: &Path,
) -> Result<PathBuf> {
    use image::Rgba;
    use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut};
    use imageproc::rect::Rect;

    let mut canvas = image.to_rgba8();
    let (img_w, img_h) = (canvas.width(), canvas.height());
    if img_w == 0 || img_h == 0 {
        anyhow::bail!(
            "cannot annotate image with zero dimensions: {}",
            image_path.display()
        );
    }

    let rect_color = Rgba([255, 0, 0, 255]);
    let landmark_color = Rgba([0, 255, 0, 255]);

    for face in faces {
        let bbox = &face.bounding_box;
        let x1 = bbox.x.clamp(0, img_w as i32 - 1);
        let y1 = bbox.y.clamp(0, img_h as i32 - 1);
        let x2 = (bbox.x + bbox.w).clamp(0, img_w as i32 - 1);
        let y2 = (bbox.y + bbox.h).clamp(0, img_h as i32 - 1);
        let width = (x2 - x1).max(1) as u32;
        let height = (y2 - y1).max(1) as u32;
        draw_hollow_rect_mut(
            &mut canvas,
            Rect::at(x1, y1).of_size(width, height),
            rect_color,
        );
        for landmark in &face.landmarks {
            let cx = clamp_to_i32(landmark.x, img_w);
            let cy = clamp_to_i32(landmark.y, img_h);
            draw_filled_circle_mut(&mut canvas, (cx, cy), 2, landmark_color);
        }
    }

    let file_name = image_path
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("frame.png"));
    let output_path = output_dir.join(file_name);

    canvas
        .save(&output_path)
        .with_context(|| format!("failed to save annotated image {}", output_path.display()))?;

    Ok(output_path)
}

fn clamp_to_i32(value: f32, max_extent: u32) -> i32 {
    if max_extent == 0 {
        return 0;
    }
    let max = (max_extent - 1) as f32;
    value.clamp(0.0, max).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        DetectArgs::command().debug_assert();
    }

    #[test]
    fn threshold_override_replaces_all_three() {
        let mut settings = AppSettings::default();
        let args = DetectArgs::parse_from([
            "mtcnn",
            "--input",
            "photo.jpg",
            "--thresholds",
            "0.5",
            "0.6",
            "0.8",
        ]);
        apply_cli_overrides(&mut settings, &args);
        assert_eq!(settings.cascade.thresholds, [0.5, 0.6, 0.8]);
    }

    #[test]
    fn clamp_keeps_landmarks_inside_image() {
        assert_eq!(clamp_to_i32(-5.0, 100), 0);
        assert_eq!(clamp_to_i32(250.0, 100), 99);
        assert_eq!(clamp_to_i32(50.4, 100), 50);
    }
}
