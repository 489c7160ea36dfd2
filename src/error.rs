use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlugError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Trigger '{trigger}' failed: {message}")]
    Handler { trigger: String, message: String },
    #[error("Trigger '{trigger}' aborted at handler {at}: {source}")]
    Aborted {
        trigger: String,
        at: usize,
        #[source]
        source: Box<PlugError>,
    },
    #[error("Plugin has been detached and can not be attached again")]
    Detached,
    #[error("Plugin is already attached to holder {0}")]
    AlreadyAttached(u64),
    #[error("Unknown plugin definition: {0}")]
    UnknownDefinition(String),
    #[error("Parse error: {message}")]
    Parse { message: String, line: Option<usize> },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PlugError>;

// Helper conversions
impl From<serde_json::Error> for PlugError {
    // `line` is the section line, which the JSON value alone does not know
    fn from(e: serde_json::Error) -> Self {
        Self::Parse { message: e.to_string(), line: None }
    }
}
impl From<config::ConfigError> for PlugError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
