pub mod agent;
pub mod babbling;
pub mod config;
pub mod data;
pub mod environment;
pub mod error;
pub mod feed;
pub mod feedback;
pub mod listener;
pub mod logging;
pub mod narsese;
pub mod operations;
pub mod prediction;
pub mod recorder;
pub mod retry;
pub mod transport;
