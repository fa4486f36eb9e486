use thiserror::Error;

#[derive(Error, Debug)]
pub enum NormalizationError {
    #[error("Taxonomy '{0}' has no canonical trees loaded")]
    TaxonomyNotLoaded(String),

    #[error("Unknown taxonomy: {0}")]
    UnknownTaxonomy(String),

    #[error("No label rows for statement '{statement}' in taxonomy '{taxonomy}'")]
    MissingLabels { taxonomy: String, statement: String },

    #[error("Invalid canonical tree: {0}")]
    InvalidTree(String),

    #[error("Invalid triangulation rule '{equation}': {details}")]
    InvalidRule { equation: String, details: String },

    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid frame label: {0}")]
    InvalidFrame(String),

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("No facts available for entity: {0}")]
    UnknownEntity(String),

    #[error("Shared cache lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl NormalizationError {
    /// True for the structural misconfiguration kinds, as opposed to malformed input data.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::TaxonomyNotLoaded(_)
                | Self::UnknownTaxonomy(_)
                | Self::MissingLabels { .. }
                | Self::InvalidTree(_)
                | Self::InvalidRule { .. }
                | Self::InvalidConfig(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, NormalizationError>;
