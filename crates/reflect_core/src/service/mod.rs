//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repositories, the version store and the import pipeline into
//!   use-case level APIs.
//! - Keep callers decoupled from key layout and batch composition.

pub mod import_service;
pub mod reflection_service;

use crate::repo::entity_repo::RepoError;
use crate::store::StoreError;
use crate::version::VersionError;
use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("reflection not found: {0}")]
    ReflectionNotFound(String),
    #[error(transparent)]
    Version(#[from] VersionError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
