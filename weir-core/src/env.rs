//! Build environment exposed to running steps

use std::collections::BTreeMap;

use crate::domain::execution::PipelineExecution;

pub const CICD_GIT_COMMIT: &str = "CICD_GIT_COMMIT";
pub const CICD_GIT_BRANCH: &str = "CICD_GIT_BRANCH";
pub const CICD_GIT_URL: &str = "CICD_GIT_URL";
pub const CICD_GIT_REPO_NAME: &str = "CICD_GIT_REPO_NAME";
pub const CICD_GIT_REF: &str = "CICD_GIT_REF";
pub const CICD_GIT_TAG: &str = "CICD_GIT_TAG";
pub const CICD_PIPELINE_ID: &str = "CICD_PIPELINE_ID";
pub const CICD_PIPELINE_NAME: &str = "CICD_PIPELINE_NAME";
pub const CICD_TRIGGER_TYPE: &str = "CICD_TRIGGER_TYPE";
pub const CICD_EVENT: &str = "CICD_EVENT";
pub const CICD_EXECUTION_ID: &str = "CICD_EXECUTION_ID";
pub const CICD_EXECUTION_SEQUENCE: &str = "CICD_EXECUTION_SEQUENCE";

/// Variables injected into every build container
pub const PRESERVED_ENV_VARS: &[&str] = &[
    CICD_GIT_COMMIT,
    CICD_GIT_BRANCH,
    CICD_GIT_URL,
    CICD_GIT_REPO_NAME,
    CICD_PIPELINE_ID,
    CICD_PIPELINE_NAME,
    CICD_TRIGGER_TYPE,
    CICD_EXECUTION_ID,
    CICD_EXECUTION_SEQUENCE,
];

/// Variables only present for some triggers
pub const CONDITIONAL_ENV_VARS: &[&str] = &[CICD_GIT_REF, CICD_GIT_TAG, CICD_EVENT];

/// Everything a caller may reference from a step definition
pub fn env_var_whitelist() -> Vec<&'static str> {
    PRESERVED_ENV_VARS
        .iter()
        .chain(CONDITIONAL_ENV_VARS)
        .copied()
        .collect()
}

/// Repository name without owner or `.git` suffix
pub fn repo_name_from_url(url: &str) -> &str {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last)
}

/// The build metadata variables for `execution`, merged over its trigger env vars
pub fn build_env(execution: &PipelineExecution) -> BTreeMap<String, String> {
    let mut env = execution.spec.env_vars.clone();
    let spec = &execution.spec;

    let mut set = |key: &str, value: String| {
        env.insert(key.to_string(), value);
    };

    set(CICD_GIT_COMMIT, execution.commit().unwrap_or_default().to_string());
    set(CICD_GIT_BRANCH, execution.branch().unwrap_or_default().to_string());
    set(CICD_GIT_URL, spec.repository_url.clone());
    set(
        CICD_GIT_REPO_NAME,
        repo_name_from_url(&spec.repository_url).to_string(),
    );
    set(CICD_PIPELINE_ID, spec.pipeline_name.to_string());
    set(CICD_PIPELINE_NAME, spec.pipeline_name.name.clone());
    set(CICD_TRIGGER_TYPE, spec.triggered_by.to_string());
    set(CICD_EXECUTION_ID, execution.meta.reference().to_string());
    set(CICD_EXECUTION_SEQUENCE, spec.run.to_string());
    if let Some(git_ref) = &spec.git_ref {
        set(CICD_GIT_REF, git_ref.clone());
    }
    if let Some(event) = spec.event {
        set(CICD_EVENT, event.as_str().to_string());
    }

    env
}

/// Replace `${NAME}` occurrences with values from `vars`
///
/// Unknown names are left untouched.
pub fn interpolate(template: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
