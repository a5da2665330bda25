pub mod animation;
pub mod config;
pub mod error;
pub mod pose;
pub mod retarget;
pub mod skeleton;
pub mod vmc;
