pub mod job;
pub mod slide;
