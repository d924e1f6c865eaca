//! HEIC/HEIF to JPEG conversion engine
//!
//! The pipeline is container parsing ([`heif`]), decoding ([`decoder`]),
//! orientation and resizing ([`transform`]) and JPEG encoding ([`jpeg`]).
//! [`converter::convert`] runs it on the calling thread; [`session::ConversionSession`]
//! runs it as a cancellable job with progress reporting. The HTTP service in
//! `main.rs` is built from [`router`].

pub mod config;
pub mod converter;
pub mod decoder;
pub mod error;
pub mod handlers;
pub mod heif;
pub mod job;
pub mod jpeg;
pub mod raster;
pub mod router;
pub mod session;
pub mod source;
pub mod state;
pub mod transform;
pub mod worker;

pub use config::{ChromaSubsampling, ConversionOptions, Limits};
pub use converter::{convert, EncodedOutput};
pub use error::{ConvertError, DecodeErrorCode, ErrorKind};
pub use job::{JobHandle, JobState, ProgressEvent, ProgressStream, Stage};
pub use session::ConversionSession;
