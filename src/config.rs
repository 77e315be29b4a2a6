//! Parser configuration surface (spec §6). This crate does not own a
//! general config-layering system (env/CLI/file precedence belongs to the
//! excluded "global configuration loading" collaborator); it only exposes
//! a plain struct and a minimal `key=value` reader, in the spirit of
//! `environment.rs`'s single-purpose env-var lookups in the teacher crate.

use crate::error::{ParserError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OracleKind {
    ArcEager,
    ListSystem,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    pub labeled: bool,
    pub delexicalized: bool,
    pub oracle: OracleKind,
    pub language: String,

    pub use_postag: bool,
    pub use_distance: bool,
    pub use_valency: bool,
    pub use_cluster: bool,
    pub use_length: bool,

    pub embedding_size: usize,
    pub distance_embedding_size: usize,
    pub valency_embedding_size: usize,
    pub cluster_embedding_size: usize,
    pub length_embedding_size: usize,
    pub hidden_size: usize,

    pub num_basic_tokens: usize,
    pub num_dist_tokens: usize,
    pub num_valency_tokens: usize,
    pub num_cluster_tokens: usize,
    pub num_length_tokens: usize,
    pub num_tokens: usize,
    pub num_pre_computed: usize,

    pub word_cut_off: u32,
    pub init_range: f64,
    pub max_iter: usize,
    pub finetune_iter: usize,
    pub eval_per_iter: usize,
    pub clear_gradient_per_iter: usize,
    pub save_intermediate: bool,
    pub fix_word_embeddings: bool,
    pub training_threads: usize,
    pub debug: bool,

    /// Exposes the otherwise-implicit `known_labels.len() - 2` placement
    /// as a configuration key, per spec §9 Open Question 2.
    #[serde(default = "default_root_label")]
    pub root_label: String,
}

fn default_root_label() -> String {
    "root".to_string()
}

impl ParserConfig {
    /// Minimal `key=value`, one pair per line, `#`-prefixed comments and
    /// blank lines ignored. Mirrors the header reader in `model_io` in
    /// shape, not in format (this is a human-edited settings file, not the
    /// model's own fixed 19-line header).
    pub fn parse_kv(text: &str) -> Result<std::collections::HashMap<String, String>> {
        let mut map = std::collections::HashMap::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                ParserError::ConfigInvalid(format!("line {}: missing '='", lineno + 1))
            })?;
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(map)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_tokens == 0 {
            return Err(ParserError::ConfigInvalid("num_tokens must be > 0".into()));
        }
        if self.training_threads == 0 {
            return Err(ParserError::ConfigInvalid(
                "training_threads must be > 0".into(),
            ));
        }
        if self.hidden_size == 0 {
            return Err(ParserError::ConfigInvalid("hidden_size must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_kv_skips_comments_and_blanks() {
        let text = "labeled=true\n# a comment\n\nhidden_size=200\n";
        let map = ParserConfig::parse_kv(text).unwrap();
        assert_eq!(map.get("labeled").unwrap(), "true");
        assert_eq!(map.get("hidden_size").unwrap(), "200");
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn parse_kv_rejects_malformed_line() {
        let text = "not_a_pair\n";
        assert!(ParserConfig::parse_kv(text).is_err());
    }
}
