pub mod algorithms;
pub mod articulation;
pub mod cache;
pub mod drivers;
pub mod impulse_response;
pub mod joint;
pub mod loop_joint;
pub mod scratch;
pub mod solver;

use joint::JointErrors;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MultibodyErrors {
    #[error("cannot compute '{0}' while the articulation data is dirty, call common_init first")]
    DataDirty(&'static str),
    #[error("buffer length mismatch: expected {expected}, got {actual}")]
    BufferLengthMismatch { expected: usize, actual: usize },
    #[error("dof count mismatch: articulation has {expected} dofs, got {actual}")]
    DofCountMismatch { expected: usize, actual: usize },
    #[error("articulation must have at least a root link")]
    EmptyArticulation,
    #[error("'{0}' requires a floating base articulation")]
    FixedBaseUnsupported(&'static str),
    #[error("sim dt must be positive and finite, got {0}")]
    InvalidDt(f64),
    #[error("link index {0} is out of range")]
    InvalidLink(usize),
    #[error("link {link} has parent {parent}, links must be topologically sorted")]
    NotTopologicallySorted { link: usize, parent: usize },
    #[error("total articulation mass is zero")]
    ZeroTotalMass,
    #[error("{0}")]
    JointErrors(#[from] JointErrors),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    RonDeserialize(#[from] ron::error::SpannedError),
    #[error("{0}")]
    RonSerialize(#[from] ron::Error),
}
