// src/handlers/mod.rs

pub mod admin;
pub mod ai;
pub mod attempt;
pub mod auth;
pub mod dashboard;
pub mod lifeline;
pub mod profile;
pub mod quiz;
pub mod training;
