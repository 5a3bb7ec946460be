// src/utils/mod.rs

pub mod hackathon_lock;
pub mod hash;
pub mod html;
pub mod jwt;
