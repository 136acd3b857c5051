//! Image reference parsing
//!
//! References follow `[registry[:port]/]repository[:tag][@digest]`. A colon is
//! a tag separator only when it comes after the last slash, so
//! `localhost:5000/app` has no tag.

use crate::digest::DigestUtils;
use crate::error::{PushError, Result};
use std::fmt;

pub const DEFAULT_TAG: &str = "latest";

const MAX_TAG_LENGTH: usize = 128;

/// Split a reference into repository and tag.
///
/// The tag is empty when the reference has none. Any registry host stays part
/// of the repository.
pub fn split_repository_tag(reference: &str) -> (String, String) {
    let last_slash = reference.rfind('/');
    match reference.rfind(':') {
        Some(colon) if last_slash.is_none_or(|slash| colon > slash) => (
            reference[..colon].to_string(),
            reference[colon + 1..].to_string(),
        ),
        _ => (reference.to_string(), String::new()),
    }
}

/// A parsed image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry host with optional port, when the reference names one
    pub registry: Option<String>,
    /// Repository path without the registry host
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    pub fn parse(reference: &str) -> Result<Self> {
        let invalid = |reason: &str| PushError::invalid_reference(reference, reason);

        if reference.trim().is_empty() {
            return Err(invalid("reference is empty"));
        }
        if reference.chars().any(char::is_whitespace) {
            return Err(invalid("reference contains whitespace"));
        }

        let (name, digest) = match reference.split_once('@') {
            Some((name, digest)) => {
                if !DigestUtils::is_valid_docker_digest(digest) {
                    return Err(invalid("digest must be sha256: followed by 64 hex characters"));
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        let (name, tag) = split_repository_tag(name);
        let tag = if tag.is_empty() {
            if name.len() < reference.len() && digest.is_none() {
                return Err(invalid("tag is empty"));
            }
            None
        } else {
            if !is_valid_tag(&tag) {
                return Err(invalid("tag may contain only letters, digits, '_', '.' and '-'"));
            }
            Some(tag)
        };

        let mut components: Vec<&str> = name.split('/').collect();
        let registry = if components.len() > 1 && looks_like_registry(components[0]) {
            Some(components.remove(0).to_string())
        } else {
            None
        };

        if components.iter().any(|component| !is_valid_path_component(component)) {
            return Err(invalid(
                "repository components must be lowercase letters, digits and separators",
            ));
        }

        Ok(Self {
            registry,
            repository: components.join("/"),
            tag,
            digest,
        })
    }

    /// Tag to push under, `latest` when none was given
    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }

    /// Tag, digest or `latest`, as used in a manifest URL
    pub fn manifest_reference(&self) -> &str {
        match (&self.tag, &self.digest) {
            (Some(tag), _) => tag,
            (None, Some(digest)) => digest,
            (None, None) => DEFAULT_TAG,
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{}/", registry)?;
        }
        f.write_str(&self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// Host and port of a registry URL, scheme and path removed
pub fn registry_host(registry_url: &str) -> &str {
    let without_scheme = registry_url
        .strip_prefix("https://")
        .or_else(|| registry_url.strip_prefix("http://"))
        .unwrap_or(registry_url);
    without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
}

/// Where a local image lands in the target registry.
///
/// The registry URL's scheme is dropped and its host and port kept verbatim,
/// followed by the source's full repository name (including any registry
/// host it names) and its tag. A digest on the source is not carried over.
///
/// A source registry that cannot be part of a repository path, such as one
/// with a port, is an error.
pub fn destination_reference(registry_url: &str, image_ref: &str) -> Result<String> {
    let host = registry_host(registry_url);
    if host.is_empty() {
        return Err(PushError::Config("registry URL is required".to_string()));
    }

    ImageReference::parse(image_ref)?;
    let name = image_ref.split_once('@').map_or(image_ref, |(name, _)| name);
    let (repository, tag) = split_repository_tag(name);

    let mut destination = format!("{}/{}", host, repository);
    if !tag.is_empty() {
        destination.push(':');
        destination.push_str(&tag);
    }

    if ImageReference::parse(&destination).is_err() {
        return Err(PushError::invalid_reference(
            image_ref,
            format!("source registry cannot be pushed under {}", host),
        ));
    }
    Ok(destination)
}

fn looks_like_registry(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

fn is_valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    tag.len() <= MAX_TAG_LENGTH
        && (first.is_ascii_alphanumeric() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn is_valid_path_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes.iter().all(|b| {
                    b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'_' | b'-')
                })
        }
        _ => false,
    }
}
