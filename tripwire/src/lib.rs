// tripwire/src/lib.rs
//
// Tripwire: sliding-window abuse detection for community platforms.
//
// Two pipelines share one ledger design:
//   antinuke: bans, kicks, role churn per actor, judged by a periodic sweep
//   automod:  message rate per author, judged as each message lands
//
// Decisions leave through an ActionExecutor; the engine never talks to the
// platform directly.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod feed;
pub mod filter;
pub mod state;

pub use config::GuardConfig;
pub use engine::{Engine, FollowUp, MessageOutcome};
pub use executor::{ActionExecutor, JsonlExecutor};
