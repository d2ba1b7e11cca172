use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheWardenError {
    #[error("Failed to read local file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    BadStatus { status: u16, body: String },
    #[error("Response carried no job identifier: {0}")]
    MissingJobId(String),
    #[error("Invalid server entry '{0}': expected an http(s) URL")]
    InvalidServer(String),
    #[error("No servers configured")]
    NoServers,
    #[error("Workflow unavailable: {0}")]
    WorkflowUnavailable(String),
    #[error("Failed to compile status page template: {0}")]
    Template(#[from] handlebars::TemplateError),
    #[error("Failed to render status page: {0}")]
    Render(#[from] handlebars::RenderError),
    #[error(transparent)]
    Trigger(#[from] TriggerError),
}

/// Why a manual or scheduled trigger was not carried out.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    #[error("A fleet pass is already running")]
    Busy,
    #[error("Server {0} already has a reconciliation in flight")]
    InFlight(usize),
    #[error("No server at index {0}")]
    NoSuchServer(usize),
    #[error("No servers configured")]
    NoServers,
}
