//! Row models and request/response DTOs.

pub mod audit;
pub mod generation;
pub mod provider_task;
pub mod subscription;
