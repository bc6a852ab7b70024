// src/signal/mod.rs

pub mod color;
pub mod state_machine;

pub use color::{ColorClassifier, HsvColorClassifier};
pub use state_machine::{SignalState, SignalStateMachine, GRID_SIZE, HISTORY_SIZE};
