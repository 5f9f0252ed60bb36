use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported argument type `{0}`")]
    UnsupportedArgumentType(String),

    #[error("negative value `{0}` cannot be encoded as an unsigned integer")]
    NegativeUnsignedValue(String),

    #[error("invalid {kind} value `{value}`: {reason}")]
    InvalidArgumentValue {
        kind: String,
        value: String,
        reason: String,
    },

    #[error("argument count mismatch: {args} args but {types} types")]
    ArgumentCountMismatch { args: usize, types: usize },

    #[error("unresolved placeholder in `{0}`")]
    UnresolvedPlaceholder(String),

    #[error("unknown deployment field `{field}` in `{placeholder}`")]
    UnknownDeploymentField { field: String, placeholder: String },

    #[error("no deployment record for contract `{0}`")]
    MissingDeploymentRecord(String),

    #[error("circular or missing dependency, blocked contracts: {}", .0.join(", "))]
    CyclicOrMissingDependency(Vec<String>),

    #[error("contract name `{0}` is declared more than once")]
    DuplicateContract(String),

    #[error("invalid calldata generator `{literal}`: {reason}")]
    InvalidGenerator { literal: String, reason: String },

    #[error("deploying {contract} failed: {source:#}")]
    DeployFailed {
        contract: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{contract} was deployed at {address} but its record could not be saved: {source}")]
    RecordNotSaved {
        contract: String,
        address: alloy::primitives::Address,
        #[source]
        source: Box<Error>,
    },

    #[error("post-deployment action {contract}.{method} failed: {source:#}")]
    PostDeployActionFailed {
        contract: String,
        method: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid_value(
        kind: impl Into<String>,
        value: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Error::InvalidArgumentValue {
            kind: kind.into(),
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}
