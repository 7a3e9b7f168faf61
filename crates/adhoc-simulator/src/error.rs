use std::path::PathBuf;

use adhoc_abstract::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("degenerate configuration: {0}")]
    DegenerateConfiguration(&'static str),

    #[error("cannot finalize an experiment with zero iterations")]
    ZeroIterations,

    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SimError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SimError::Io {
            path: path.into(),
            source,
        }
    }
}
