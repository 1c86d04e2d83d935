pub mod poll_scheduler;

pub use poll_scheduler::poll_scheduler;
