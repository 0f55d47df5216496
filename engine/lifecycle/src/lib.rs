//! Bet state machine: proposal, acceptance, proof handling, disputes,
//! deadline expiry and settlement.

mod clock;
mod config;
mod engine;
mod error;
mod locks;
mod settlement;
pub mod transitions;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config_from_file, EngineConfig, StakeModel, UnavailablePolicy, VerificationPolicy};
pub use engine::{BetEngine, ProofReceipt, ProposeParams, Resolution, SweepReport};
pub use error::{EngineError, EngineResult};
pub use locks::{BetGuard, BetLocks};
pub use settlement::{payouts, Payout, Settlement};
