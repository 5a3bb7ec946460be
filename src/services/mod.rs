// src/services/mod.rs

pub mod access;
pub mod ai_quiz;
pub mod attempt;
pub mod calendar;
pub mod certificate;
pub mod enrollment;
pub mod leaderboard;
pub mod lifeline;
pub mod llm;
pub mod mail;
pub mod reminder;
