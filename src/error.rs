use thiserror::Error;

pub type Result<T> = std::result::Result<T, PoolBalancerError>;

#[derive(Error, Debug)]
pub enum PoolBalancerError {
    #[error("error operating on k8s: {0}")]
    KubeError(kube::Error),

    #[error("kube watcher returned an error: {0}")]
    WatcherError(#[from] kube_runtime::watcher::Error),

    #[error("error loading config: {0}")]
    ConfigError(#[from] envy::Error),

    #[error("error reading {0}: {1}")]
    IOError(String, std::io::Error),

    #[error("error decoding {0}: {1}")]
    DecodeError(String, serde_json::Error),

    #[error("http request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("arm request returned {status} ({code}): {message}")]
    ArmError {
        status: u16,
        code: String,
        message: String,
    },

    #[error("instance not found")]
    InstanceNotFound,

    #[error("invalid resource id: {0}")]
    InvalidResourceId(String),

    #[error("node informer is not synced when trying to fetch node caches")]
    NodeCacheNotSynced,

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<PoolBalancerError>,
    },
}

impl PoolBalancerError {
    pub fn context(self, context: impl Into<String>) -> PoolBalancerError {
        PoolBalancerError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub fn is_instance_not_found(&self) -> bool {
        match self {
            PoolBalancerError::InstanceNotFound => true,
            PoolBalancerError::Context { source, .. } => source.is_instance_not_found(),
            _ => false,
        }
    }
}

#[allow(clippy::from_over_into)]
impl<T> Into<Result<T>> for PoolBalancerError {
    fn into(self) -> Result<T> {
        Err(self)
    }
}
