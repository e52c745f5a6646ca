pub mod matcher;
pub mod ocr;
pub mod screenshot;
pub mod templates;
pub mod types;
