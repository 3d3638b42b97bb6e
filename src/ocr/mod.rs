pub mod engine;
pub mod preprocess;
pub mod setup;

pub use engine::{BoundingBox, OcrEngine, OcrLine, OcrWord, TesseractEngine};
pub use preprocess::prepare_for_ocr;
pub use setup::ensure_tesseract;
