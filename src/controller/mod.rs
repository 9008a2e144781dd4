// src/controller/mod.rs

pub mod loop_controller;

pub use loop_controller::{LoopController, LoopProxy};
