// src/models/mod.rs

pub mod attempt;
pub mod quiz;
pub mod training;
pub mod user;
