//! Route handlers

pub mod health;
pub mod index;
pub mod update;
pub mod value;
