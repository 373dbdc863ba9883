//! Vision/OCR Layer
//!
//! Binarizes captured stills and extracts their text. Supports two
//! binarization strategies:
//! - Compute shader via wgpu (feature `gpu`)
//! - CPU pixel loop (always available)
//!
//! Text recognition goes through a lazily constructed engine shared by every
//! caller of a [`RecognitionAdapter`].

#[cfg(feature = "gpu")]
pub mod gpu;
pub mod ocr;
pub mod preprocess;
pub mod tesseract;

#[cfg(feature = "gpu")]
pub use gpu::GpuBinarizer;
pub use ocr::{
    EngineFactory, PercentCallback, ProgressSink, Recognition, RecognitionAdapter,
    RecognitionEngine, RecognitionError, RecognitionProgress,
};
pub use preprocess::{
    binarize_rgba, Binarizer, CpuBinarizer, PreprocessError, PreprocessSettings, Preprocessor,
    DEFAULT_THRESHOLD,
};
pub use tesseract::{RecognitionSettings, TesseractEngine, TesseractFactory};
