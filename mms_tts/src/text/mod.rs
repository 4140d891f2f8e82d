//! Text frontend: character-level tokenization for VITS checkpoints.

pub mod tokenizer;

pub use tokenizer::{TokenizerConfig, VitsTokenizer};
