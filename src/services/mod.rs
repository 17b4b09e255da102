pub mod inference;
pub mod queue;
pub mod storage;
pub mod sweeper;
pub mod worker;
