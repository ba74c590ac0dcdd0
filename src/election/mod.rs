pub mod elector;
pub mod state;
pub mod timer;

pub use elector::{LeaderCallbacks, LeaderElector};
pub use state::{LeadershipFlag, LeadershipState};
