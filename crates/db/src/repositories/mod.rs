pub mod queue_job_repo;

pub use queue_job_repo::QueueJobRepo;
