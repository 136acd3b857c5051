//! Command-line argument parsing

use crate::config::DEFAULT_REGISTRY_URL;
use crate::credentials::CredentialFlags;
use crate::registry::DEFAULT_CHUNK_SIZE;
use crate::registry::retry::DEFAULT_MAX_RETRIES;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "image-pusher")]
#[command(about = "Push an image from the local Docker image store to an OCI registry")]
#[command(version)]
pub struct Args {
    /// Local image reference, e.g. `myapp:v1`
    #[arg(value_name = "IMAGE")]
    pub image: String,

    /// Target registry URL
    #[arg(
        long = "registry",
        short = 'r',
        default_value = DEFAULT_REGISTRY_URL,
        help = "Registry URL; the scheme selects http or https"
    )]
    pub registry: String,

    /// Registry username
    #[arg(
        long = "username",
        short = 'u',
        default_value = "",
        hide_default_value = true,
        help = "Username for registry authentication (or REGISTRY_USERNAME)"
    )]
    pub username: String,

    /// Registry password
    #[arg(
        long = "password",
        short = 'p',
        default_value = "",
        hide_default_value = true,
        help = "Password for registry authentication (or REGISTRY_PASSWORD)"
    )]
    pub password: String,

    /// Registry bearer token
    #[arg(
        long = "token",
        short = 't',
        default_value = "",
        hide_default_value = true,
        help = "Bearer token for registry authentication (or REGISTRY_TOKEN)"
    )]
    pub token: String,

    /// Skip TLS verification
    #[arg(
        long = "insecure",
        short = 'k',
        help = "Skip TLS certificate and hostname verification"
    )]
    pub insecure: bool,

    /// Retry attempts after the first failure
    #[arg(
        long = "max-retries",
        default_value_t = DEFAULT_MAX_RETRIES,
        value_parser = clap::value_parser!(u32).range(1..),
        help = "Maximum number of retries for transient failures"
    )]
    pub max_retries: u32,

    /// Chunk size for blob uploads
    #[arg(
        long = "chunk-size",
        short = 'c',
        default_value_t = DEFAULT_CHUNK_SIZE,
        value_parser = parse_chunk_size,
        help = "Largest upload request body in bytes"
    )]
    pub chunk_size: usize,

    /// Verbose output
    #[arg(long = "verbose", short = 'v', help = "Enable verbose output")]
    pub verbose: bool,

    /// Quiet mode
    #[arg(
        long = "quiet",
        short = 'q',
        conflicts_with = "verbose",
        help = "Only print the pushed reference and errors"
    )]
    pub quiet: bool,
}

fn parse_chunk_size(value: &str) -> Result<usize, String> {
    let size: usize = value
        .parse()
        .map_err(|_| format!("chunk size must be a number of bytes, got {}", value))?;
    if size == 0 {
        return Err("chunk size must be greater than 0".to_string());
    }
    Ok(size)
}

impl Args {
    pub fn credential_flags(&self) -> CredentialFlags {
        CredentialFlags {
            username: self.username.clone(),
            password: self.password.clone(),
            token: self.token.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["image-pusher", "myapp:v1"]).unwrap();
        assert_eq!(args.image, "myapp:v1");
        assert_eq!(args.registry, DEFAULT_REGISTRY_URL);
        assert_eq!(args.max_retries, 10);
        assert_eq!(args.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(!args.insecure);
        assert!(args.username.is_empty());
        assert!(args.token.is_empty());
    }

    #[test]
    fn test_credential_flags() {
        let args = Args::try_parse_from([
            "image-pusher",
            "myapp",
            "--registry",
            "http://localhost:5000",
            "-u",
            "admin",
            "-p",
            "secret",
            "--insecure",
        ])
        .unwrap();
        let flags = args.credential_flags();
        assert_eq!(flags.username, "admin");
        assert_eq!(flags.password, "secret");
        assert!(flags.token.is_empty());
        assert!(args.insecure);
    }

    #[test]
    fn test_rejects_zero_retries_and_chunk_size() {
        assert!(Args::try_parse_from(["image-pusher", "myapp", "--max-retries", "0"]).is_err());
        assert!(Args::try_parse_from(["image-pusher", "myapp", "--chunk-size", "0"]).is_err());
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Args::try_parse_from(["image-pusher", "myapp", "-q", "-v"]).is_err());
    }

    #[test]
    fn test_image_is_required() {
        assert!(Args::try_parse_from(["image-pusher"]).is_err());
    }
}
