//! Arena session engine - the match lifecycle core of a team-versus-team
//! arena minigame
//!
//! This crate owns everything between lobby formation and results recycling:
//! - the session state machine and its timer-driven phase transitions
//! - two-sided team balancing for joins and switches
//! - arena selection (first/cycle/vote)
//! - weighted, interval-scaled random equipment distribution
//!
//! Physical worlds, chat rendering, persistence and command surfaces live in
//! the host environment and reach the engine only through the
//! [`host::HostServices`] boundary.

pub mod arena;
pub mod balance;
pub mod config;
pub mod equipment;
pub mod host;
pub mod session;
pub mod timer;
pub mod util;

pub use arena::{ArenaSelector, SelectionMode, VoteError, VoteOutcome, VoteState};
pub use balance::{SwitchDenied, TeamBalancer, TeamSizes};
pub use config::{ConfigError, LobbyConfig};
pub use equipment::{EquipmentDistributor, ItemKind, ItemTemplate};
pub use host::{ArenaHandle, HostError, HostServices, NullHost, RecordingHost};
pub use session::machine::SessionStateMachine;
pub use session::registry::{SessionCommand, SessionHandle, SessionRegistry};
pub use session::team::{Participant, Team, TeamId, TeamResult};
pub use session::{MatchOutcome, MatchRecord, Phase, SessionError, SessionEvent};
pub use timer::{TaskScheduler, Timer, TimerTick};
