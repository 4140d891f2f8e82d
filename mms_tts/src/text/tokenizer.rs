//! Character-level tokenizer for MMS/VITS checkpoints.
//!
//! MMS checkpoints ship a raw `vocab.json` mapping characters (occasionally
//! multi-character units) to token ids, rather than a BPE `tokenizer.json`.
//! Tokenization lowercases the input, keeps only vocabulary entries via
//! greedy longest match, and optionally intersperses the blank (pad) token
//! between every symbol, which is what the model was trained on.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

/// Tokenizer settings read from `tokenizer_config.json`.
///
/// All fields are optional in the file; defaults match the MMS checkpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenizerConfig {
    /// Intersperse the blank token between symbols.
    #[serde(default = "default_true")]
    pub add_blank: bool,

    /// Drop characters that are not in the vocabulary.
    #[serde(default = "default_true")]
    pub normalize: bool,

    /// Whether the vocabulary is uppercase (a handful of MMS languages).
    #[serde(default)]
    pub is_uppercase: bool,

    /// Token used as the blank; resolved against the vocabulary.
    #[serde(default)]
    pub pad_token: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            add_blank: true,
            normalize: true,
            is_uppercase: false,
            pad_token: None,
        }
    }
}

/// Character tokenizer matching the `VitsTokenizer` behavior.
#[derive(Debug, Clone)]
pub struct VitsTokenizer {
    vocab: HashMap<String, u32>,
    /// Vocabulary keys, longest first, for greedy matching.
    keys_by_length: Vec<String>,
    blank_id: u32,
    add_blank: bool,
    is_uppercase: bool,
}

impl VitsTokenizer {
    /// Build a tokenizer from a vocabulary map and settings.
    pub fn new(vocab: HashMap<String, u32>, config: TokenizerConfig) -> Self {
        let mut keys_by_length: Vec<String> = vocab.keys().cloned().collect();
        // Longest first so multi-character entries win over their prefixes;
        // ties broken lexicographically to keep matching deterministic.
        keys_by_length.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let blank_id = config
            .pad_token
            .as_deref()
            .and_then(|token| vocab.get(token).copied())
            .unwrap_or(0);

        Self {
            vocab,
            keys_by_length,
            blank_id,
            add_blank: config.add_blank,
            is_uppercase: config.is_uppercase,
        }
    }

    /// Load `vocab.json` (and `tokenizer_config.json` if present) from a
    /// model directory.
    pub fn from_dir(model_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let model_dir = model_dir.as_ref();
        let vocab_path = model_dir.join("vocab.json");
        let vocab_str = std::fs::read_to_string(&vocab_path)
            .with_context(|| format!("Failed to read {}", vocab_path.display()))?;
        let vocab: HashMap<String, u32> = serde_json::from_str(&vocab_str)
            .with_context(|| format!("Failed to parse {}", vocab_path.display()))?;

        let config_path = model_dir.join("tokenizer_config.json");
        let config = match std::fs::read_to_string(&config_path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?,
            Err(_) => {
                tracing::debug!(
                    "No tokenizer_config.json in {}, using defaults",
                    model_dir.display()
                );
                TokenizerConfig::default()
            }
        };

        Ok(Self::new(vocab, config))
    }

    /// Number of entries in the vocabulary.
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    /// Id of the blank token interspersed between symbols.
    pub fn blank_id(&self) -> u32 {
        self.blank_id
    }

    /// Encode text to token ids.
    ///
    /// Characters with no vocabulary entry are silently dropped, matching the
    /// reference tokenizer's normalization. Returns an empty vector when
    /// nothing in the input is representable.
    pub fn encode(&self, text: &str) -> Vec<u32> {
        let text = if self.is_uppercase {
            text.to_uppercase()
        } else {
            text.to_lowercase()
        };

        let mut tokens = Vec::new();
        let mut pos = 0;
        while pos < text.len() {
            let rest = &text[pos..];
            match self.keys_by_length.iter().find(|key| rest.starts_with(*key)) {
                Some(key) => {
                    tokens.push(self.vocab[key]);
                    pos += key.len();
                }
                None => {
                    // Skip one character; everything outside the vocabulary
                    // is unpronounceable for this checkpoint.
                    let next = rest.chars().next().map_or(1, char::len_utf8);
                    pos += next;
                }
            }
        }

        if tokens.is_empty() {
            return tokens;
        }

        if self.add_blank {
            let mut interspersed = Vec::with_capacity(tokens.len() * 2 + 1);
            interspersed.push(self.blank_id);
            for token in tokens {
                interspersed.push(token);
                interspersed.push(self.blank_id);
            }
            interspersed
        } else {
            tokens
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tokenizer(add_blank: bool) -> VitsTokenizer {
        let vocab: HashMap<String, u32> = [("_", 0), ("a", 1), ("b", 2), ("ch", 3), ("c", 4)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let config = TokenizerConfig {
            add_blank,
            pad_token: Some("_".to_string()),
            ..TokenizerConfig::default()
        };
        VitsTokenizer::new(vocab, config)
    }

    #[test]
    fn test_encode_intersperses_blank() {
        let tokenizer = test_tokenizer(true);
        assert_eq!(tokenizer.encode("ab"), vec![0, 1, 0, 2, 0]);
    }

    #[test]
    fn test_encode_without_blank() {
        let tokenizer = test_tokenizer(false);
        assert_eq!(tokenizer.encode("ba"), vec![2, 1]);
    }

    #[test]
    fn test_longest_match_wins() {
        let tokenizer = test_tokenizer(false);
        // "ch" is a single vocabulary entry, not "c" + skipped "h".
        assert_eq!(tokenizer.encode("cha"), vec![3, 1]);
        assert_eq!(tokenizer.encode("ca"), vec![4, 1]);
    }

    #[test]
    fn test_unknown_characters_dropped() {
        let tokenizer = test_tokenizer(false);
        assert_eq!(tokenizer.encode("a!?b"), vec![1, 2]);
        assert!(tokenizer.encode("!?").is_empty());
        assert!(tokenizer.encode("").is_empty());
    }

    #[test]
    fn test_lowercases_input() {
        let tokenizer = test_tokenizer(false);
        assert_eq!(tokenizer.encode("AB"), vec![1, 2]);
    }

    #[test]
    fn test_multibyte_unknown_characters() {
        let tokenizer = test_tokenizer(false);
        // Multi-byte characters outside the vocabulary must be skipped whole.
        assert_eq!(tokenizer.encode("aہb"), vec![1, 2]);
    }
}
