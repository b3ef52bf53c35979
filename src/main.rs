//! Command line entry point for recognition, retraining, and model admin.

use std::path::PathBuf;
use std::sync::Arc;

use signsense::config::{self, AppConfig, DEFAULT_TARGET_FPS};
use signsense::jobs::{JobCoordinator, StartOutcome};
use signsense::landmarks::{
    COORDS_PER_KEYPOINT, KEYPOINTS_PER_HAND, MAX_HANDS, OnnxHandLandmarker,
};
use signsense::model::{ModelArtifact, ModelMetadata, SignClassifier};
use signsense::runtime::{ModelRuntime, RecordingOptions};
use signsense::store::{NewModel, Store};
use signsense::training::Orchestrator;
use signsense::video::FfmpegDecoder;

fn main() {
    if let Err(err) = signsense::logging::init() {
        eprintln!("Logging setup failed: {err}");
    }
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

enum Command {
    Predict {
        video: PathBuf,
        expect: Option<String>,
    },
    Retrain {
        dataset: String,
        base: Option<String>,
        job_name: Option<String>,
    },
    Models,
    Activate {
        name: String,
    },
    InitModel {
        name: String,
        words: Vec<String>,
        max_frames: usize,
        hidden: usize,
        fps: f32,
    },
    AddDataset {
        name: String,
        root: PathBuf,
    },
}

fn run() -> Result<(), String> {
    let Some(command) = parse_args(std::env::args().skip(1).collect())? else {
        return Ok(());
    };
    let config = config::load_or_default().map_err(|err| err.to_string())?;
    match command {
        Command::Predict { video, expect } => predict(&config, &video, expect.as_deref()),
        Command::Retrain {
            dataset,
            base,
            job_name,
        } => retrain(&config, &dataset, base.as_deref(), job_name.as_deref()),
        Command::Models => list_models(&config),
        Command::Activate { name } => activate(&config, &name),
        Command::InitModel {
            name,
            words,
            max_frames,
            hidden,
            fps,
        } => init_model(&config, &name, words, max_frames, hidden, fps),
        Command::AddDataset { name, root } => add_dataset(&config, &name, &root),
    }
}

fn predict(config: &AppConfig, video: &PathBuf, expect: Option<&str>) -> Result<(), String> {
    let store = Store::open(&config.database_path).map_err(|err| err.to_string())?;
    let active = store
        .active_model()
        .map_err(|err| err.to_string())?
        .ok_or_else(|| "No active model; run 'signsense activate <name>' first".to_string())?;

    let decoder = Arc::new(FfmpegDecoder::new(&config.ffmpeg_bin, &config.ffprobe_bin));
    let detector =
        Arc::new(OnnxHandLandmarker::new(&config.detector_model).map_err(|err| err.to_string())?);
    let recordings = config.save_recordings.then(|| RecordingOptions {
        directory: config.recordings_dir.clone(),
    });
    let runtime = ModelRuntime::new(decoder, detector, recordings);
    runtime.activate(&active).map_err(|err| err.to_string())?;

    match runtime.infer(video, expect).map_err(|err| err.to_string())? {
        Some(prediction) => println!(
            "Recognized '{}' ({:.1}%)",
            prediction.word,
            prediction.probability * 100.0
        ),
        None => println!("No hands detected"),
    }
    Ok(())
}

fn retrain(
    config: &AppConfig,
    dataset_name: &str,
    base: Option<&str>,
    job_name: Option<&str>,
) -> Result<(), String> {
    let store = Store::open(&config.database_path).map_err(|err| err.to_string())?;
    let dataset = store
        .dataset_by_name(dataset_name)
        .map_err(|err| err.to_string())?
        .ok_or_else(|| format!("Dataset not found: {dataset_name}"))?;
    let base_model = match base {
        Some(name) => store
            .model_by_name(name)
            .map_err(|err| err.to_string())?
            .ok_or_else(|| format!("Base model not found: {name}"))?,
        None => store
            .active_model()
            .map_err(|err| err.to_string())?
            .ok_or_else(|| "No active model to use as base; pass --base".to_string())?,
    };

    let name = match job_name {
        Some(name) => name.to_string(),
        None => format!("job-{}", unix_now()),
    };
    let job = store
        .insert_job(&name, dataset.id, Some(base_model.id))
        .map_err(|err| err.to_string())?;

    let decoder = Arc::new(FfmpegDecoder::new(&config.ffmpeg_bin, &config.ffprobe_bin));
    let detector =
        Arc::new(OnnxHandLandmarker::new(&config.detector_model).map_err(|err| err.to_string())?);
    let orchestrator = Orchestrator::new(&config.database_path, &config.models_dir, decoder, detector);
    let coordinator = JobCoordinator::new(&config.database_path, Arc::new(orchestrator));

    match coordinator.start(job.id).map_err(|err| err.to_string())? {
        StartOutcome::Busy => {
            println!("Another training job is running; '{name}' stays PENDING");
            return Ok(());
        }
        StartOutcome::Started => println!("Training job '{name}' started"),
    }
    coordinator.wait(job.id);

    let finished = store.job(job.id).map_err(|err| err.to_string())?;
    println!("Training job '{name}' finished: {}", finished.status.as_str());
    if let Some(model_id) = finished.output_model_id {
        let model = store.model(model_id).map_err(|err| err.to_string())?;
        println!(
            "Produced model '{}' (accuracy {:.1}%); activate it with 'signsense activate {}'",
            model.name,
            model.accuracy * 100.0,
            model.name
        );
    }
    Ok(())
}

fn list_models(config: &AppConfig) -> Result<(), String> {
    let store = Store::open(&config.database_path).map_err(|err| err.to_string())?;
    let models = store.models().map_err(|err| err.to_string())?;
    if models.is_empty() {
        println!("No models");
        return Ok(());
    }
    println!("Models:");
    for model in models {
        let marker = if model.is_active { "*" } else { "-" };
        println!(
            "{marker} {} | words={} | max_frames={} | accuracy={:.1}% | created_at={}",
            model.name,
            model.word_list().len(),
            model.max_frames,
            model.accuracy * 100.0,
            model.created_at
        );
    }
    Ok(())
}

fn activate(config: &AppConfig, name: &str) -> Result<(), String> {
    let store = Store::open(&config.database_path).map_err(|err| err.to_string())?;
    let model = store
        .model_by_name(name)
        .map_err(|err| err.to_string())?
        .ok_or_else(|| format!("Model not found: {name}"))?;
    store.activate_model(model.id).map_err(|err| err.to_string())?;
    println!("Active model set to '{name}'");
    Ok(())
}

fn init_model(
    config: &AppConfig,
    name: &str,
    words: Vec<String>,
    max_frames: usize,
    hidden: usize,
    fps: f32,
) -> Result<(), String> {
    if words.is_empty() {
        return Err("--words requires at least one word".to_string());
    }
    let num_features = MAX_HANDS * KEYPOINTS_PER_HAND * COORDS_PER_KEYPOINT;
    let artifact = ModelArtifact {
        classifier: SignClassifier::untrained(words.clone(), max_frames, num_features, hidden, 42),
        metadata: ModelMetadata {
            max_frames,
            num_features,
            words: words.clone(),
            fps,
            test_accuracy: 0.0,
            word_accuracy: Default::default(),
        },
    };
    let file_path = artifact
        .save(&config.models_dir, name)
        .map_err(|err| err.to_string())?;

    let store = Store::open(&config.database_path).map_err(|err| err.to_string())?;
    store
        .insert_model(&NewModel {
            name: name.to_string(),
            file_path: file_path.clone(),
            max_frames: max_frames as i64,
            num_features: num_features as i64,
            words: words.join(","),
            fps: fps as f64,
            accuracy: 0.0,
            word_accuracy: Default::default(),
            is_active: true,
        })
        .map_err(|err| err.to_string())?;
    println!(
        "Created and activated model '{name}' ({} words) at {}",
        words.len(),
        file_path.display()
    );
    Ok(())
}

fn add_dataset(config: &AppConfig, name: &str, root: &PathBuf) -> Result<(), String> {
    if !root.is_dir() {
        return Err(format!("Dataset root is not a directory: {}", root.display()));
    }
    let store = Store::open(&config.database_path).map_err(|err| err.to_string())?;
    let dataset = store
        .insert_dataset(name, root)
        .map_err(|err| err.to_string())?;
    println!(
        "Registered dataset '{}' at {}",
        dataset.name,
        dataset.root_directory.display()
    );
    Ok(())
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn parse_args(args: Vec<String>) -> Result<Option<Command>, String> {
    let Some(subcommand) = args.first() else {
        println!("{}", help_text());
        return Ok(None);
    };
    let rest = &args[1..];
    match subcommand.as_str() {
        "-h" | "--help" | "help" => {
            println!("{}", help_text());
            Ok(None)
        }
        "predict" => {
            let mut video = None;
            let mut expect = None;
            let mut idx = 0usize;
            while idx < rest.len() {
                match rest[idx].as_str() {
                    "--expect" => {
                        idx += 1;
                        let value = rest
                            .get(idx)
                            .ok_or_else(|| "--expect requires a value".to_string())?;
                        expect = Some(value.clone());
                    }
                    other if video.is_none() => video = Some(PathBuf::from(other)),
                    other => return Err(format!("Unexpected argument: {other}")),
                }
                idx += 1;
            }
            let video = video.ok_or_else(|| "predict requires a video path".to_string())?;
            Ok(Some(Command::Predict { video, expect }))
        }
        "retrain" => {
            let mut dataset = None;
            let mut base = None;
            let mut job_name = None;
            let mut idx = 0usize;
            while idx < rest.len() {
                match rest[idx].as_str() {
                    "--dataset" => {
                        idx += 1;
                        dataset = Some(required(rest, idx, "--dataset")?);
                    }
                    "--base" => {
                        idx += 1;
                        base = Some(required(rest, idx, "--base")?);
                    }
                    "--name" => {
                        idx += 1;
                        job_name = Some(required(rest, idx, "--name")?);
                    }
                    other => return Err(format!("Unexpected argument: {other}")),
                }
                idx += 1;
            }
            let dataset = dataset.ok_or_else(|| "retrain requires --dataset".to_string())?;
            Ok(Some(Command::Retrain {
                dataset,
                base,
                job_name,
            }))
        }
        "models" => Ok(Some(Command::Models)),
        "activate" => {
            let name = rest
                .first()
                .cloned()
                .ok_or_else(|| "activate requires a model name".to_string())?;
            Ok(Some(Command::Activate { name }))
        }
        "init-model" => {
            let mut name = None;
            let mut words = Vec::new();
            let mut max_frames = 30usize;
            let mut hidden = 64usize;
            let mut fps = DEFAULT_TARGET_FPS;
            let mut idx = 0usize;
            while idx < rest.len() {
                match rest[idx].as_str() {
                    "--name" => {
                        idx += 1;
                        name = Some(required(rest, idx, "--name")?);
                    }
                    "--words" => {
                        idx += 1;
                        words = required(rest, idx, "--words")?
                            .split(',')
                            .filter(|word| !word.is_empty())
                            .map(|word| word.trim().to_string())
                            .collect();
                    }
                    "--max-frames" => {
                        idx += 1;
                        max_frames = parse_number(&required(rest, idx, "--max-frames")?)?;
                    }
                    "--hidden" => {
                        idx += 1;
                        hidden = parse_number(&required(rest, idx, "--hidden")?)?;
                    }
                    "--fps" => {
                        idx += 1;
                        fps = required(rest, idx, "--fps")?
                            .parse::<f32>()
                            .map_err(|err| format!("Invalid --fps: {err}"))?;
                    }
                    other => return Err(format!("Unexpected argument: {other}")),
                }
                idx += 1;
            }
            let name = name.ok_or_else(|| "init-model requires --name".to_string())?;
            Ok(Some(Command::InitModel {
                name,
                words,
                max_frames,
                hidden,
                fps,
            }))
        }
        "add-dataset" => {
            let mut name = None;
            let mut root = None;
            let mut idx = 0usize;
            while idx < rest.len() {
                match rest[idx].as_str() {
                    "--name" => {
                        idx += 1;
                        name = Some(required(rest, idx, "--name")?);
                    }
                    "--root" => {
                        idx += 1;
                        root = Some(PathBuf::from(required(rest, idx, "--root")?));
                    }
                    other => return Err(format!("Unexpected argument: {other}")),
                }
                idx += 1;
            }
            let name = name.ok_or_else(|| "add-dataset requires --name".to_string())?;
            let root = root.ok_or_else(|| "add-dataset requires --root".to_string())?;
            Ok(Some(Command::AddDataset { name, root }))
        }
        other => Err(format!("Unknown command: {other}\n\n{}", help_text())),
    }
}

fn required(args: &[String], idx: usize, flag: &str) -> Result<String, String> {
    args.get(idx)
        .cloned()
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_number(raw: &str) -> Result<usize, String> {
    raw.parse::<usize>().map_err(|err| format!("Invalid number '{raw}': {err}"))
}

fn help_text() -> String {
    [
        "signsense - ASL word recognition and retraining",
        "",
        "Usage:",
        "  signsense predict <video> [--expect WORD]",
        "  signsense retrain --dataset NAME [--base MODEL] [--name JOB]",
        "  signsense models",
        "  signsense activate <model-name>",
        "  signsense init-model --name NAME --words a,b,c [--max-frames N] [--hidden N] [--fps F]",
        "  signsense add-dataset --name NAME --root DIR",
    ]
    .join("\n")
}
