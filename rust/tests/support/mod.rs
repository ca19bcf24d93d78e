#![allow(dead_code)]

mod backend;
mod helpers;

pub use backend::*;
pub use helpers::*;
