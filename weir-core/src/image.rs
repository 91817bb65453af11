//! Image reference parsing

/// Registry used when an image reference does not name one
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

/// Tag used when an image reference does not carry one
pub const DEFAULT_TAG: &str = "latest";

/// Split `registry/repo:tag` into its parts
///
/// The first path segment is a registry only when it looks like a host
/// (contains `.` or `:`, or is `localhost`). Missing parts fall back to
/// [`DEFAULT_REGISTRY`] and [`DEFAULT_TAG`]. For a digest reference
/// (`repo@sha256:...`) the digest takes the place of the tag.
pub fn split_image_tag(image: &str) -> (String, String, String) {
    let (registry, rest) = match image.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (first.to_string(), rest)
        }
        _ => (DEFAULT_REGISTRY.to_string(), image),
    };

    if let Some((repo, digest)) = rest.split_once('@') {
        let last_slash = repo.rfind('/').map(|i| i + 1).unwrap_or(0);
        let repo = match repo[last_slash..].rfind(':') {
            Some(i) => &repo[..last_slash + i],
            None => repo,
        };
        return (registry, repo.to_string(), digest.to_string());
    }

    // A ':' after the last '/' separates the tag; earlier ones belong to a port.
    let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
    let (repo, tag) = match rest[last_slash..].rfind(':') {
        Some(i) => {
            let split = last_slash + i;
            (rest[..split].to_string(), rest[split + 1..].to_string())
        }
        None => (rest.to_string(), DEFAULT_TAG.to_string()),
    };

    let tag = if tag.is_empty() {
        DEFAULT_TAG.to_string()
    } else {
        tag
    };

    (registry, repo, tag)
}
