//! Model configuration and the embedding configuration resolver.
//!
//! [`TabTransformerConfig`] carries every construction option.
//! [`TabTransformerConfig::validate`] checks it against the column metadata
//! and produces a [`ModelConfiguration`], the resolved record the model
//! builders consume. Validation never allocates parameters.

use std::collections::BTreeMap;

use burn::config::Config;
use serde::{Deserialize, Serialize};

use super::mlp::Activation;
use crate::widedeep::error::{Result, WideDeepError};

/// Reserved column name for the pooled summary token.
pub const SPECIAL_TOKEN: &str = "special_token";

/// Column name to position in a batch row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnIndex {
    positions: BTreeMap<String, usize>,
}

impl ColumnIndex {
    /// Build from explicit `(name, position)` pairs. Positions must be unique.
    pub fn new<S, I>(pairs: I) -> Result<Self>
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, usize)>,
    {
        let mut positions = BTreeMap::new();
        let mut seen = std::collections::BTreeSet::new();
        for (name, position) in pairs {
            let name = name.into();
            if !seen.insert(position) {
                return Err(WideDeepError::configuration(format!(
                    "position {position} is assigned to more than one column"
                )));
            }
            if positions.insert(name.clone(), position).is_some() {
                return Err(WideDeepError::configuration(format!(
                    "column '{name}' appears more than once"
                )));
            }
        }
        Ok(Self { positions })
    }

    /// Positions follow the order of `names`.
    pub fn from_names<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Result<Self> {
        Self::new(names.into_iter().enumerate().map(|(i, n)| (n, i)))
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Minimum row width able to hold every indexed column.
    pub fn row_width(&self) -> usize {
        self.positions.values().max().map_or(0, |p| p + 1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.positions.iter().map(|(k, v)| (k.as_str(), *v))
    }

    fn require(&self, name: &str) -> Result<usize> {
        self.position(name).ok_or_else(|| {
            WideDeepError::configuration(format!("column '{name}' is not in the column index"))
        })
    }
}

/// Normalisation applied to continuous columns that are not embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContinuousNormKind {
    LayerNorm,
    BatchNorm,
}

impl std::str::FromStr for ContinuousNormKind {
    type Err = WideDeepError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "layernorm" => Ok(Self::LayerNorm),
            "batchnorm" => Ok(Self::BatchNorm),
            other => Err(WideDeepError::configuration(format!(
                "unknown continuous normalisation '{other}', expected 'layernorm' or 'batchnorm'"
            ))),
        }
    }
}

/// Encoder block used for the whole chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    /// Self-attention over tokens (TabTransformer).
    Standard,
    /// Self-attention over tokens, then over the batch (SAINT).
    Dual,
}

#[derive(Config, Debug)]
pub struct TabTransformerConfig {
    /// Column positions in the dense batch
    pub column_idx: ColumnIndex,
    /// `(column, cardinality)` for every categorical column
    pub embed_input: Vec<(String, usize)>,
    pub continuous_cols: Option<Vec<String>>,
    #[config(default = 0.1)]
    pub embed_dropout: f64,
    #[config(default = false)]
    pub full_embed_dropout: bool,
    #[config(default = false)]
    pub shared_embed: bool,
    #[config(default = false)]
    pub add_shared_embed: bool,
    #[config(default = 8)]
    pub frac_shared_embed: usize,
    #[config(default = 32)]
    pub input_dim: usize,
    #[config(default = 8)]
    pub n_heads: usize,
    #[config(default = 6)]
    pub n_blocks: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
    #[config(default = false)]
    pub keep_attn_weights: bool,
    #[config(default = 128)]
    pub ff_hidden_dim: usize,
    #[config(default = "Activation::Gelu")]
    pub transformer_activation: Activation,
    #[config(default = false)]
    pub with_special_token: bool,
    #[config(default = false)]
    pub embed_continuous: bool,
    #[config(default = "ContinuousNormKind::LayerNorm")]
    pub cont_norm_layer: ContinuousNormKind,
    /// Full head layout, first entry being the pooled width
    pub mlp_hidden_dims: Option<Vec<usize>>,
    #[config(default = "Activation::Relu")]
    pub mlp_activation: Activation,
    #[config(default = 0.1)]
    pub mlp_dropout: f64,
    #[config(default = false)]
    pub mlp_batchnorm: bool,
    #[config(default = false)]
    pub mlp_batchnorm_last: bool,
    #[config(default = true)]
    pub mlp_linear_first: bool,
    #[config(default = "BlockKind::Standard")]
    pub block_kind: BlockKind,
    #[config(default = 42)]
    pub seed: u64,
}

/// A categorical column after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoricalColumn {
    pub name: String,
    pub position: usize,
    pub cardinality: usize,
}

/// How categorical codes become vectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CategoricalStrategy {
    Independent { full_embed_dropout: bool },
    Shared {
        add: bool,
        shared_dim: usize,
        full_embed_dropout: bool,
    },
}

/// What happens to continuous columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuousStrategy {
    Absent,
    Embedded,
    Normalized(ContinuousNormKind),
}

/// Validated, resolved construction record.
#[derive(Debug, Clone)]
pub struct ModelConfiguration {
    pub categorical: Vec<CategoricalColumn>,
    /// `(name, position)` of continuous columns
    pub continuous: Vec<(String, usize)>,
    pub categorical_strategy: CategoricalStrategy,
    pub continuous_strategy: ContinuousStrategy,
    pub with_special_token: bool,
    /// Tokens entering the encoder
    pub n_tokens: usize,
    /// Width fed to the output head
    pub pooled_width: usize,
    pub mlp_hidden_dims: Vec<usize>,
    /// Minimum dense batch width
    pub row_width: usize,
}

impl ModelConfiguration {
    pub fn output_dim(&self) -> usize {
        self.mlp_hidden_dims.last().copied().unwrap_or(self.pooled_width)
    }
}

/// Width of the pooled representation entering the output head.
///
/// With a special token the first token is pooled, so the width is the model
/// width plus any continuous columns appended after normalisation. Otherwise
/// every token is flattened.
pub fn resolve_input_width(
    n_categorical: usize,
    n_continuous: usize,
    with_special_token: bool,
    embed_continuous: bool,
    model_width: usize,
) -> usize {
    let appended = if embed_continuous { 0 } else { n_continuous };
    if with_special_token {
        model_width + appended
    } else if embed_continuous {
        (n_categorical + n_continuous) * model_width
    } else {
        n_categorical * model_width + appended
    }
}

/// `[w, 4w, 2w]` for input width `w`, unless explicit dims are given.
pub fn resolve_hidden_dims(explicit: Option<&[usize]>, input_width: usize) -> Vec<usize> {
    match explicit {
        Some(dims) => dims.to_vec(),
        None => vec![input_width, input_width * 4, input_width * 2],
    }
}

fn check_probability(name: &str, p: f64) -> Result<()> {
    if (0.0..1.0).contains(&p) {
        Ok(())
    } else {
        Err(WideDeepError::configuration(format!(
            "{name} must be in [0, 1), got {p}"
        )))
    }
}

impl TabTransformerConfig {
    /// Number of continuous columns declared.
    pub fn n_continuous(&self) -> usize {
        self.continuous_cols.as_ref().map_or(0, Vec::len)
    }

    /// Check every option against the column metadata and resolve the
    /// embedding strategy and head layout.
    pub fn validate(&self) -> Result<ModelConfiguration> {
        if self.column_idx.contains(SPECIAL_TOKEN) && !self.with_special_token {
            return Err(WideDeepError::configuration(
                "the data was preprocessed with the special token column, \
                 set with_special_token to true",
            ));
        }
        if self.with_special_token {
            match self.embed_input.first() {
                Some((name, _)) if name == SPECIAL_TOKEN => {}
                _ => {
                    return Err(WideDeepError::configuration(format!(
                        "with_special_token requires '{SPECIAL_TOKEN}' as the first categorical column"
                    )));
                }
            }
        }

        let mut categorical = Vec::with_capacity(self.embed_input.len());
        for (name, cardinality) in &self.embed_input {
            if categorical.iter().any(|c: &CategoricalColumn| &c.name == name) {
                return Err(WideDeepError::configuration(format!(
                    "categorical column '{name}' is declared twice"
                )));
            }
            categorical.push(CategoricalColumn {
                name: name.clone(),
                position: self.column_idx.require(name)?,
                cardinality: *cardinality,
            });
        }

        let mut continuous = Vec::with_capacity(self.n_continuous());
        for name in self.continuous_cols.iter().flatten() {
            if categorical.iter().any(|c| &c.name == name) {
                return Err(WideDeepError::configuration(format!(
                    "column '{name}' is declared both categorical and continuous"
                )));
            }
            if continuous.iter().any(|(n, _): &(String, usize)| n == name) {
                return Err(WideDeepError::configuration(format!(
                    "continuous column '{name}' is declared twice"
                )));
            }
            continuous.push((name.clone(), self.column_idx.require(name)?));
        }

        if self.input_dim == 0 || self.n_heads == 0 || self.input_dim % self.n_heads != 0 {
            return Err(WideDeepError::configuration(format!(
                "input_dim ({}) must be a positive multiple of n_heads ({})",
                self.input_dim, self.n_heads
            )));
        }
        if self.n_blocks == 0 {
            return Err(WideDeepError::configuration("n_blocks must be at least 1"));
        }
        if self.ff_hidden_dim == 0 {
            return Err(WideDeepError::configuration("ff_hidden_dim must be positive"));
        }
        check_probability("embed_dropout", self.embed_dropout)?;
        check_probability("dropout", self.dropout)?;
        check_probability("mlp_dropout", self.mlp_dropout)?;
        if self.mlp_activation.is_gated() {
            return Err(WideDeepError::configuration(format!(
                "{:?} is only supported inside the transformer feed-forward",
                self.mlp_activation
            )));
        }

        let categorical_strategy = if self.shared_embed {
            let shared_dim = if self.add_shared_embed {
                self.input_dim
            } else {
                if self.frac_shared_embed == 0 || self.input_dim % self.frac_shared_embed != 0 {
                    return Err(WideDeepError::configuration(format!(
                        "frac_shared_embed ({}) must be a positive divisor of input_dim ({})",
                        self.frac_shared_embed, self.input_dim
                    )));
                }
                self.input_dim / self.frac_shared_embed
            };
            CategoricalStrategy::Shared {
                add: self.add_shared_embed,
                shared_dim,
                full_embed_dropout: self.full_embed_dropout,
            }
        } else {
            CategoricalStrategy::Independent {
                full_embed_dropout: self.full_embed_dropout,
            }
        };

        let continuous_strategy = match (continuous.is_empty(), self.embed_continuous) {
            (true, _) => ContinuousStrategy::Absent,
            (false, true) => ContinuousStrategy::Embedded,
            (false, false) => ContinuousStrategy::Normalized(self.cont_norm_layer),
        };

        let embed_continuous = continuous_strategy == ContinuousStrategy::Embedded;
        let n_tokens = categorical.len() + if embed_continuous { continuous.len() } else { 0 };
        if n_tokens == 0 {
            return Err(WideDeepError::configuration(
                "no categorical columns and continuous columns are not embedded: nothing to attend over",
            ));
        }

        let pooled_width = resolve_input_width(
            categorical.len(),
            continuous.len(),
            self.with_special_token,
            embed_continuous,
            self.input_dim,
        );
        let mlp_hidden_dims = resolve_hidden_dims(self.mlp_hidden_dims.as_deref(), pooled_width);
        if mlp_hidden_dims.len() < 2 || mlp_hidden_dims.contains(&0) {
            return Err(WideDeepError::configuration(
                "mlp_hidden_dims needs at least an input and an output width, all positive",
            ));
        }
        if mlp_hidden_dims[0] != pooled_width {
            return Err(WideDeepError::configuration(format!(
                "mlp_hidden_dims starts at {} but the pooled encoder output is {} wide",
                mlp_hidden_dims[0], pooled_width
            )));
        }

        log::debug!(
            "resolved {} categorical / {} continuous columns: {:?}, {:?}, {} tokens, head {:?}",
            categorical.len(),
            continuous.len(),
            categorical_strategy,
            continuous_strategy,
            n_tokens,
            mlp_hidden_dims
        );

        Ok(ModelConfiguration {
            categorical,
            continuous,
            categorical_strategy,
            continuous_strategy,
            with_special_token: self.with_special_token,
            n_tokens,
            pooled_width,
            mlp_hidden_dims,
            row_width: self.column_idx.row_width(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(names: &[&str]) -> ColumnIndex {
        ColumnIndex::from_names(names.iter().copied()).unwrap()
    }

    fn embed(cols: &[(&str, usize)]) -> Vec<(String, usize)> {
        cols.iter().map(|(n, c)| (n.to_string(), *c)).collect()
    }

    #[test]
    fn test_resolver_rules() {
        // special token, continuous embedded
        assert_eq!(resolve_input_width(3, 2, true, true, 16), 16);
        // special token, continuous normalised and appended
        assert_eq!(resolve_input_width(3, 2, true, false, 16), 18);
        // special token, no continuous columns
        assert_eq!(resolve_input_width(3, 0, true, false, 16), 16);
        // continuous embedded, no special token
        assert_eq!(resolve_input_width(3, 2, false, true, 16), 80);
        // continuous appended
        assert_eq!(resolve_input_width(3, 2, false, false, 16), 50);
        // categorical only
        assert_eq!(resolve_input_width(3, 0, false, false, 16), 48);
    }

    #[test]
    fn test_hidden_dims_default_and_explicit() {
        assert_eq!(resolve_hidden_dims(None, 10), vec![10, 40, 20]);
        assert_eq!(resolve_hidden_dims(Some(&[10, 3]), 10), vec![10, 3]);
    }

    #[test]
    fn test_column_index_rejects_duplicate_positions() {
        assert!(ColumnIndex::new([("a", 0), ("b", 0)]).is_err());
        assert!(ColumnIndex::new([("a", 0), ("a", 1)]).is_err());
        let idx = ColumnIndex::new([("a", 3), ("b", 0)]).unwrap();
        assert_eq!(idx.row_width(), 4);
        assert_eq!(idx.position("a"), Some(3));
    }

    #[test]
    fn test_validate_defaults() {
        let config = TabTransformerConfig::new(columns(&["a", "b", "c"]), embed(&[("a", 4), ("b", 3)]))
            .with_continuous_cols(Some(vec!["c".to_string()]));
        let resolved = config.validate().unwrap();

        assert_eq!(resolved.n_tokens, 2);
        assert_eq!(resolved.pooled_width, 2 * 32 + 1);
        assert_eq!(resolved.mlp_hidden_dims, vec![65, 260, 130]);
        assert_eq!(resolved.output_dim(), 130);
        assert_eq!(
            resolved.continuous_strategy,
            ContinuousStrategy::Normalized(ContinuousNormKind::LayerNorm)
        );
    }

    #[test]
    fn test_special_token_mismatch_is_configuration_error() {
        let config = TabTransformerConfig::new(
            columns(&[SPECIAL_TOKEN, "a"]),
            embed(&[(SPECIAL_TOKEN, 1), ("a", 4)]),
        );
        let err = config.validate().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("with_special_token"));
    }

    #[test]
    fn test_unknown_and_overlapping_columns() {
        let config = TabTransformerConfig::new(columns(&["a"]), embed(&[("zz", 4)]));
        assert!(config.validate().unwrap_err().is_configuration());

        let config = TabTransformerConfig::new(columns(&["a", "b"]), embed(&[("a", 4)]))
            .with_continuous_cols(Some(vec!["a".to_string()]));
        assert!(config.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_head_and_dims_validation() {
        let base = || TabTransformerConfig::new(columns(&["a"]), embed(&[("a", 4)]));

        assert!(base().with_input_dim(30).validate().is_err());
        assert!(base().with_n_blocks(0).validate().is_err());
        assert!(base().with_mlp_activation(Activation::Geglu).validate().is_err());
        assert!(base().with_mlp_hidden_dims(Some(vec![31, 8])).validate().is_err());
        assert!(base().with_mlp_hidden_dims(Some(vec![32, 8])).validate().is_ok());
        assert!(
            base()
                .with_shared_embed(true)
                .with_frac_shared_embed(5)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_nothing_to_attend_over() {
        let config = TabTransformerConfig::new(columns(&["c"]), Vec::new())
            .with_continuous_cols(Some(vec!["c".to_string()]));
        assert!(config.validate().is_err());
        assert!(config.clone().with_embed_continuous(true).validate().is_ok());
    }

    #[test]
    fn test_norm_kind_from_str() {
        assert_eq!("LayerNorm".parse::<ContinuousNormKind>().unwrap(), ContinuousNormKind::LayerNorm);
        assert_eq!("batchnorm".parse::<ContinuousNormKind>().unwrap(), ContinuousNormKind::BatchNorm);
        assert!("groupnorm".parse::<ContinuousNormKind>().is_err());
    }
}
