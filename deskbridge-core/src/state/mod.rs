pub mod session;

pub use session::{PhaseLog, SessionPhase};
