//! Image Pusher Library
//!
//! Pushes images from the local Docker image store to OCI registries. The
//! pieces are usable on their own: credential resolution, image store access,
//! the registry client and its retry decorator.

pub mod cli;
pub mod config;
pub mod credentials;
pub mod digest;
pub mod error;
pub mod image;
pub mod logging;
pub mod registry;

pub use config::RegistryConfig;
pub use credentials::{CredentialFlags, Credentials};
pub use error::{PushError, Result};
pub use registry::{DefaultRegistryClient, PushResult, RegistryClient, RetryConfig, RetryingClient};
