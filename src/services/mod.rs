pub mod backend;
pub mod export;
pub mod queue;
pub mod reaper;
pub mod status;
pub mod storage;
pub mod submission;
pub mod worker;
