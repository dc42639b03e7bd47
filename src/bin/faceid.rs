//! CLI application for the face analysis pipeline.
//!
//! Usage:
//!   faceid <image>                          # Human-readable output
//!   faceid <image> --json                   # JSON output
//!   faceid <image> --recognition fr.bin     # Also extract embeddings

use std::path::PathBuf;

use clap::Parser;
use image::GenericImageView;
use serde::Serialize;
use veriface::{Aligner, Detector, Identifier, ImageData};

#[derive(Parser, Debug)]
#[command(name = "faceid")]
#[command(author, version, about = "Face detection, alignment and identification", long_about = None)]
struct Args {
    /// Input image file
    #[arg(required = true)]
    image: PathBuf,

    /// Output as JSON
    #[arg(short, long)]
    json: bool,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Face detector model path
    #[arg(long, default_value = "seeta_fd_frontal_v1.0.bin")]
    detector: PathBuf,

    /// Landmark model path
    #[arg(long, default_value = "seeta_fa_v1.1.bin")]
    landmarks: PathBuf,

    /// Identification model path; embeddings are extracted when given
    #[arg(long)]
    recognition: Option<PathBuf>,

    /// Minimum face size for detection
    #[arg(long, default_value = "40")]
    min_face_size: u32,

    /// Detection score threshold
    #[arg(long, default_value = "2.0")]
    score_thresh: f64,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct Output {
    image: String,
    width: u32,
    height: u32,
    faces_detected: usize,
    faces: Vec<FaceOutput>,
}

#[derive(Serialize)]
struct FaceOutput {
    /// Face index (1-based)
    index: usize,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    score: f64,
    landmarks: Vec<[f32; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    embedding: Option<Vec<f32>>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(err) = run(&args) {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut detector = Detector::from_file(&args.detector)?;
    detector.set_min_face_size(args.min_face_size)?;
    detector.set_score_thresh(args.score_thresh)?;
    let aligner = Aligner::from_file(&args.landmarks)?;
    let mut identifier = match &args.recognition {
        Some(path) => Some(Identifier::from_file(path)?),
        None => None,
    };

    let img = image::open(&args.image)?;
    let (width, height) = img.dimensions();
    let gray = img.to_luma8();
    let gray_view = ImageData::gray(gray.as_raw(), width, height)?;
    let rgb = img.to_rgb8();
    let rgb_view = ImageData::with_channels(rgb.as_raw(), width, height, 3)?;

    if args.verbose {
        eprintln!("image {}x{}", width, height);
    }

    let faces = detector.detect(&gray_view)?;
    let mut outputs = Vec::with_capacity(faces.len());

    for (i, face) in faces.iter().enumerate() {
        let landmarks = aligner.detect_landmarks(&gray_view, face)?;
        let embedding = match identifier.as_mut() {
            Some(ident) => Some(ident.extract_with_crop(&rgb_view, &landmarks)?),
            None => None,
        };
        outputs.push(FaceOutput {
            index: i + 1,
            x: face.bbox.x,
            y: face.bbox.y,
            width: face.bbox.width,
            height: face.bbox.height,
            score: face.score,
            landmarks: landmarks.iter().map(|p| [p.x, p.y]).collect(),
            embedding,
        });
    }

    let report = Output {
        image: args.image.display().to_string(),
        width,
        height,
        faces_detected: outputs.len(),
        faces: outputs,
    };

    let text = if args.json {
        serde_json::to_string_pretty(&report)?
    } else {
        render_text(&report)
    };

    match &args.output {
        Some(path) => std::fs::write(path, text)?,
        None => println!("{}", text),
    }
    Ok(())
}

fn render_text(report: &Output) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} ({}x{}): {} face(s)\n",
        report.image, report.width, report.height, report.faces_detected
    ));
    for face in &report.faces {
        out.push_str(&format!(
            "  #{}: ({}, {}) {}x{} score {:.2}\n",
            face.index, face.x, face.y, face.width, face.height, face.score
        ));
        const NAMES: [&str; 5] = ["left eye", "right eye", "nose", "left mouth", "right mouth"];
        for (name, p) in NAMES.iter().zip(face.landmarks.iter()) {
            out.push_str(&format!("      {:<11} ({:.1}, {:.1})\n", name, p[0], p[1]));
        }
        if let Some(embedding) = &face.embedding {
            out.push_str(&format!("      embedding of {} values\n", embedding.len()));
        }
    }
    out
}
