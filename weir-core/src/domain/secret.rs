//! Secrets the engine reads and provisions

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::meta::ObjectMeta;

/// Key of the docker config document in a `DockerConfigJson` secret
pub const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecretKind {
    #[default]
    Opaque,
    DockerConfigJson,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    pub meta: ObjectMeta,
    #[serde(default)]
    pub kind: SecretKind,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: BTreeMap<String, DockerAuth>,
}

#[derive(Debug, Deserialize)]
struct DockerAuth {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

impl Secret {
    pub fn opaque(meta: ObjectMeta, data: BTreeMap<String, String>) -> Self {
        Self {
            meta,
            kind: SecretKind::Opaque,
            data,
        }
    }

    /// Username and password stored for `registry` in a docker config secret
    pub fn docker_auth(&self, registry: &str) -> Option<(String, String)> {
        if self.kind != SecretKind::DockerConfigJson {
            return None;
        }
        let raw = self.data.get(DOCKER_CONFIG_KEY)?;
        let config: DockerConfig = serde_json::from_str(raw).ok()?;
        config
            .auths
            .get(registry)
            .map(|auth| (auth.username.clone(), auth.password.clone()))
    }
}
