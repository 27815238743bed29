pub mod queue_job;
