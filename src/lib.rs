//! # veriface
//!
//! Pure Rust face analysis: detection, landmark alignment and identity
//! embeddings, all driven by pre-trained binary model files.
//!
//! This crate provides three engines sharing one image interface:
//! - **Detection**: a funnel-structured cascade of LAB-boosted and
//!   SURF-MLP classifiers over a sliding-window image pyramid.
//! - **Alignment**: coarse-to-fine landmark refinement with two stacked
//!   autoencoders over shape-indexed dense-SIFT features, producing the
//!   five points (eye centers, nose tip, mouth corners).
//! - **Identification**: a miniature network runtime that aligns the
//!   face with a learned similarity transform and runs a serialized
//!   convolutional graph to emit a fixed-size embedding for
//!   cosine-similarity comparison.
//!
//! ## Pipeline overview
//!
//! 1. Feed a grayscale image to [`Detector::detect`] to get scored
//!    face bounding boxes.
//! 2. Refine each box with [`Aligner::detect_landmarks`] to get the
//!    five facial landmarks.
//! 3. Hand the landmarks and the color image to
//!    [`Identifier::extract_with_crop`]; compare embeddings with
//!    [`Identifier::similarity`].
//!
//! ## Quick start
//!
//! ```no_run
//! use veriface::{Aligner, Detector, Identifier, ImageData};
//!
//! let mut detector = Detector::from_file("seeta_fd_frontal_v1.0.bin").unwrap();
//! let aligner = Aligner::from_file("seeta_fa_v1.1.bin").unwrap();
//! let identifier = Identifier::from_file("seeta_fr_v1.0.bin").unwrap();
//!
//! detector.set_min_face_size(40).unwrap();
//! detector.set_score_thresh(2.0).unwrap();
//!
//! let (width, height) = (640u32, 480u32);
//! let gray = vec![0u8; (width * height) as usize];
//! let image = ImageData::gray(&gray, width, height).unwrap();
//!
//! for face in detector.detect(&image).unwrap() {
//!     let landmarks = aligner.detect_landmarks(&image, &face).unwrap();
//!     // Identification runs on the color image when available; a
//!     // grayscale input also works if the model was trained for it.
//!     println!("face at {:?} scoring {:.2}", face.bbox, face.score);
//!     let _ = &landmarks;
//! }
//! # let _ = identifier.feature_size();
//! ```
//!
//! Model files are self-delimited little-endian streams without magic
//! numbers; loaders validate every sentinel count and fail with
//! [`Error::InvalidModel`] on implausible values.

mod alignment;
mod detection;
mod error;
mod identification;
mod image;
mod math;
mod net;
mod pyramid;
pub mod reader;
mod types;

pub use alignment::Aligner;
pub use detection::{non_maximum_suppression, Detector};
pub use error::{Error, Result};
pub use identification::{FaceCrop, Identifier};
pub use image::{ImageBuffer, ImageData};
pub use net::{Blob, Graph, HyperParams, SampleKind};
pub use pyramid::{ImagePyramid, ScaledImage};
pub use types::{FaceInfo, Point, Rect};
