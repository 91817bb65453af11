//! Owner/repository parsing from clone URLs

use url::Url;

use crate::error::{RemoteError, Result};

/// Split a clone URL into `(owner, repo)`
///
/// The owner keeps every path segment but the last, so GitLab subgroups
/// survive (`group/sub`). A trailing `.git` is optional. SCP-style SSH URLs
/// (`git@host:owner/repo.git`) are accepted too.
pub fn parse_owner_repo(repo_url: &str) -> Result<(String, String)> {
    let invalid = || RemoteError::InvalidRepoUrl(repo_url.to_string());

    let path = match Url::parse(repo_url) {
        Ok(url) => url.path().to_string(),
        Err(_) => {
            let (_, path) = repo_url.split_once(':').ok_or_else(invalid)?;
            path.to_string()
        }
    };

    let path = path.trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let (owner, repo) = path.rsplit_once('/').ok_or_else(invalid)?;

    if owner.is_empty() || repo.is_empty() {
        return Err(invalid());
    }

    Ok((owner.to_string(), repo.to_string()))
}
