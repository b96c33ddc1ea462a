pub mod async_job;
