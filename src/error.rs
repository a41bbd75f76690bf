use simple_error::SimpleError;
use std::io;
use std::path::PathBuf;

pub type SimResult<T> = Result<T, SimError>;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("corrupt state: {0}")]
    CorruptState(String),

    #[error("precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("i/o failure on '{}': {source}", path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    // Fatal for the run; there is no mid-trial recovery.
    #[error("kernel step failure: {0}")]
    KernelStepFailure(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] SimpleError),
}

impl SimError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        SimError::CorruptState(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        SimError::PreconditionViolation(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SimError::IoFailure {
            path: path.into(),
            source,
        }
    }

    pub fn is_fatal_for_run(&self) -> bool {
        matches!(
            self,
            SimError::KernelStepFailure(_) | SimError::CorruptState(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        assert_eq!(
            SimError::corrupt("stream ended").to_string(),
            "corrupt state: stream ended"
        );

        let err = SimError::io(
            "/tmp/out.bin",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "i/o failure on '/tmp/out.bin': denied");

        let err: SimError = SimpleError::new("num_gr must be strictly positive").into();
        assert_eq!(
            err.to_string(),
            "invalid configuration: num_gr must be strictly positive"
        );
    }

    #[test]
    fn fatality() {
        assert!(SimError::KernelStepFailure("bad export".into()).is_fatal_for_run());
        assert!(!SimError::precondition("no state").is_fatal_for_run());
    }
}
