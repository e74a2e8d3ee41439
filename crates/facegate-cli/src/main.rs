use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::matcher::validate_threshold;
use facegate_core::preprocess::prepare_face;
use facegate_core::reference::reference_strings;
use facegate_core::{
    parse_reference, verify, BoundingBox, CaptureFacing, CosineMatcher, Embedding, Matcher,
    Outcome,
};
use facegate_store::ReferenceStore;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "facegate", about = "Face embedding verification for attendance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a reference embedding for a subject
    Enroll {
        #[arg(short, long)]
        subject: String,
        /// JSON file: array of numbers/numeric strings, or {"values": [...]}
        #[arg(short, long)]
        embedding: PathBuf,
    },
    /// Verify a captured embedding against the subject's reference
    Verify {
        #[arg(short, long)]
        subject: String,
        #[arg(short, long)]
        embedding: PathBuf,
        /// Override the configured similarity threshold
        #[arg(short, long, value_parser = parse_threshold)]
        threshold: Option<f32>,
    },
    /// Compare two embedding files directly
    Score {
        a: PathBuf,
        b: PathBuf,
        #[arg(short, long, value_parser = parse_threshold)]
        threshold: Option<f32>,
    },
    /// Crop, orient and rescale a face for embedding extraction
    Prepare {
        #[arg(short, long)]
        image: PathBuf,
        /// Face box as x,y,width,height in source pixels
        #[arg(short, long, value_parser = parse_bbox)]
        bbox: BoundingBox,
        #[arg(short, long)]
        out: PathBuf,
        /// Sensor that produced the capture (front captures are mirrored)
        #[arg(short, long)]
        facing: Option<CaptureFacing>,
    },
    /// List enrolled references
    List,
    /// Remove a subject's reference
    Remove {
        #[arg(short, long)]
        subject: String,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("load configuration")?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Enroll { subject, embedding } => {
            let embedding = load_embedding(&embedding)?;
            let store = ReferenceStore::open(&config.db_path).await?;
            let record = store.enroll(&subject, &embedding).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Verify {
            subject,
            embedding,
            threshold,
        } => {
            let probe = load_embedding(&embedding)?;
            let threshold = threshold.unwrap_or(config.similarity_threshold);
            let store = ReferenceStore::open(&config.db_path).await?;
            return run_verify(&store, &subject, &probe, threshold).await;
        }
        Commands::Score { a, b, threshold } => {
            let a = load_embedding(&a)?;
            let b = load_embedding(&b)?;
            let threshold = threshold.unwrap_or(config.similarity_threshold);
            let decision = CosineMatcher.compare(&a, &b, threshold)?;
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
        Commands::Prepare {
            image,
            bbox,
            out,
            facing,
        } => {
            let facing = facing.unwrap_or(config.camera_facing);
            let source = image::open(&image)
                .with_context(|| format!("open image {}", image.display()))?;
            let face = prepare_face(&source, &bbox, facing, config.face_input_size)?;
            face.save(&out)
                .with_context(|| format!("write {}", out.display()))?;
            tracing::info!(
                out = %out.display(),
                %facing,
                size = config.face_input_size,
                "prepared face crop"
            );
        }
        Commands::List => {
            let store = ReferenceStore::open(&config.db_path).await?;
            let records = store.list().await?;
            if records.is_empty() {
                println!("No references enrolled");
            } else {
                println!("{}", serde_json::to_string_pretty(&records)?);
            }
        }
        Commands::Remove { subject } => {
            let store = ReferenceStore::open(&config.db_path).await?;
            if !store.remove(&subject).await? {
                bail!("no reference enrolled for {subject:?}");
            }
            println!("Removed reference for {subject}");
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Exit 0 on acceptance, 1 when the caller should retry. Unavailable
/// references are reported as errors.
async fn run_verify(
    store: &ReferenceStore,
    subject: &str,
    probe: &Embedding,
    threshold: f32,
) -> Result<ExitCode> {
    match verify(store, subject, probe, threshold).await {
        Ok(v) => {
            let outcome = v.outcome();
            let mut report = serde_json::to_value(&v)?;
            report["outcome"] = serde_json::to_value(outcome)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(match outcome {
                Outcome::Accepted => ExitCode::SUCCESS,
                Outcome::Retry => ExitCode::FAILURE,
            })
        }
        Err(e) if e.is_retryable() => {
            tracing::warn!(subject, error = %e, "verification needs a new capture");
            let report = serde_json::json!({
                "subject": subject,
                "outcome": Outcome::Retry,
                "error": e.to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

fn load_embedding(path: &Path) -> Result<Embedding> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read embedding {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("parse embedding {}", path.display()))?;
    let embedding = match value {
        serde_json::Value::Array(items) => parse_reference(&reference_strings(&items))?,
        serde_json::Value::Object(_) => serde_json::from_value(value)?,
        _ => bail!("{}: expected a JSON array or object", path.display()),
    };
    tracing::debug!(path = %path.display(), dimension = embedding.len(), "loaded embedding");
    Ok(embedding)
}

fn parse_threshold(s: &str) -> Result<f32, String> {
    let t: f32 = s.parse().map_err(|e| format!("{e}"))?;
    validate_threshold(t).map_err(|e| e.to_string())
}

fn parse_bbox(s: &str) -> Result<BoundingBox, String> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("bbox: {e}"))?;
    match parts.as_slice() {
        &[x, y, width, height] => Ok(BoundingBox { x, y, width, height }),
        _ => Err(format!("bbox: expected x,y,width,height, got {} values", parts.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bbox() {
        let b = parse_bbox("10, 20,30.5,40").unwrap();
        assert_eq!(b, BoundingBox { x: 10.0, y: 20.0, width: 30.5, height: 40.0 });
        assert!(parse_bbox("1,2,3").is_err());
        assert!(parse_bbox("a,b,c,d").is_err());
    }

    #[test]
    fn test_parse_threshold() {
        assert_eq!(parse_threshold("0.75"), Ok(0.75));
        assert!(parse_threshold("2").is_err());
        assert!(parse_threshold("x").is_err());
    }

    #[test]
    fn test_cli_parses_verify() {
        let cli = Cli::try_parse_from([
            "facegate", "verify", "--subject", "alice", "--embedding", "probe.json", "-t", "0.8",
        ])
        .unwrap();
        match cli.command {
            Commands::Verify { subject, threshold, .. } => {
                assert_eq!(subject, "alice");
                assert_eq!(threshold, Some(0.8));
            }
            _ => panic!("expected verify"),
        }
    }

    #[test]
    fn test_cli_parses_prepare_facing() {
        let cli = Cli::try_parse_from([
            "facegate", "prepare", "-i", "in.png", "-b", "0,0,64,64", "-o", "out.png", "-f", "back",
        ])
        .unwrap();
        match cli.command {
            Commands::Prepare { facing, bbox, .. } => {
                assert_eq!(facing, Some(CaptureFacing::Back));
                assert_eq!(bbox.width, 64.0);
            }
            _ => panic!("expected prepare"),
        }
    }

    #[test]
    fn test_load_embedding_formats() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();

        let array = dir.join("array.json");
        std::fs::write(&array, r#"[0.5, "0.25", 1]"#).unwrap();
        assert_eq!(load_embedding(&array).unwrap().values, vec![0.5, 0.25, 1.0]);

        let object = dir.join("object.json");
        std::fs::write(&object, r#"{"values": [1.0, 2.0], "model_version": "mfn"}"#).unwrap();
        let e = load_embedding(&object).unwrap();
        assert_eq!(e.values, vec![1.0, 2.0]);
        assert_eq!(e.model_version.as_deref(), Some("mfn"));

        let bad = dir.join("bad.json");
        std::fs::write(&bad, r#"[0.5, "x"]"#).unwrap();
        assert!(load_embedding(&bad).is_err());
    }
}
