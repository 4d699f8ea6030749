pub mod poll_task;
