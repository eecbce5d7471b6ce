//! Dataset adapter: maps arbitrary user batch structures to a canonical
//! `(images, labels)` tensor pair, resolving the extraction functions once
//! per run through heuristics, registered shape detectors, or a single
//! interactive question.

pub mod detectors;
pub mod question;
mod resolver;

pub use detectors::{KeyedMappingDetector, ShapeDetector, WrappedPairDetector};
pub use question::{Answerer, ClosureAnswerer, Question, QuestionOption};
pub use resolver::{CacheDocument, DatasetAdapter, TensorExtractor};
