//! Source-code provider identities and cached repositories

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::meta::{ObjectMeta, ResourceRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceCodeType {
    Github,
    Gitlab,
}

impl SourceCodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceCodeType::Github => "github",
            SourceCodeType::Gitlab => "gitlab",
        }
    }
}

impl fmt::Display for SourceCodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceCodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "github" => Ok(SourceCodeType::Github),
            "gitlab" => Ok(SourceCodeType::Gitlab),
            other => Err(format!("unsupported source code provider: {}", other)),
        }
    }
}

/// OAuth identity of one platform user against one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCodeCredential {
    pub meta: ObjectMeta,
    pub spec: SourceCodeCredentialSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCodeCredentialSpec {
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub user_name: String,
    pub source_code_type: SourceCodeType,
    pub login_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub html_url: String,
    /// User name presented to git over HTTPS
    pub git_login_name: String,
    pub access_token: String,
}

/// Read/write/admin access a credential has on a repository
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoPerm {
    pub pull: bool,
    pub push: bool,
    pub admin: bool,
}

/// Cached view of one remote repository visible to a credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCodeRepository {
    pub meta: ObjectMeta,
    pub spec: SourceCodeRepositorySpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCodeRepositorySpec {
    pub source_code_type: SourceCodeType,
    #[serde(default)]
    pub user_name: String,
    pub source_code_credential_name: Option<ResourceRef>,
    pub url: String,
    #[serde(default)]
    pub permissions: RepoPerm,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
}
