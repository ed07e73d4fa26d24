#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod config;
pub mod data;
pub mod io;
pub mod model;
pub mod pipeline;
pub mod prepare;
pub mod types;

#[path = "../evaluate/mod.rs"]
pub mod evaluate;

#[path = "../explore/mod.rs"]
pub mod explore;
