pub mod aws_profile;
pub mod cli;
pub mod config;
pub mod storage;
