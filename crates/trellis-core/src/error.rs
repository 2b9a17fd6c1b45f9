use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrellisError {
    // Graph build errors
    #[error("Node already registered: {0}")]
    DuplicateNode(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Node already has an outgoing edge: {0}")]
    DuplicateEdge(String),

    #[error("Reserved node name used in an invalid position: {0}")]
    ReservedNode(String),

    #[error("Graph validation failed: {}", .0.join("; "))]
    GraphValidation(Vec<String>),

    // Run errors
    #[error("Router for node {node} returned unmapped label: {label}")]
    UnknownRoute { node: String, label: String },

    #[error("Step limit exceeded ({0})")]
    StepLimitExceeded(usize),

    #[error("Update contains undeclared state field: {0}")]
    UnknownField(String),

    #[error("Invalid update for field {field}: {message}")]
    InvalidUpdate { field: String, message: String },

    #[error("A thread id was supplied but the graph has no checkpointer")]
    CheckpointerRequired,

    // Storage errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Database error: {0}")]
    Database(String),

    // Collaborator errors
    #[error("LLM request failed: {0}")]
    Llm(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrellisError {
    /// Whether this error was raised while building or compiling a graph.
    pub fn is_build_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateNode(_)
                | Self::UnknownNode(_)
                | Self::DuplicateEdge(_)
                | Self::ReservedNode(_)
                | Self::GraphValidation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TrellisError>;
