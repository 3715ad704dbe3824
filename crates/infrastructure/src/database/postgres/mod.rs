mod postgres_job_group_repository;
mod postgres_job_log_repository;
mod postgres_job_repository;
mod postgres_lock;
mod postgres_registry_repository;

pub use postgres_job_group_repository::PostgresJobGroupRepository;
pub use postgres_job_log_repository::PostgresJobLogRepository;
pub use postgres_job_repository::PostgresJobRepository;
pub use postgres_lock::PostgresScheduleLock;
pub use postgres_registry_repository::PostgresRegistryRepository;
