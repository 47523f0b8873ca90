//! Game simulation modules

pub mod combat;
pub mod components;
pub mod entity;
pub mod lobby;
pub mod physics;
pub mod simulation;
pub mod snapshot;
pub mod world;

pub use lobby::{GameLobby, LobbyHandle, LobbyMember, LobbyRegistry};
pub use simulation::SimulationConfig;
