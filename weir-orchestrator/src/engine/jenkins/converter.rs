//! Job compiler
//!
//! Turns the pipeline snapshot of an execution into a scripted pipeline for
//! the backend. Every step runs in its own container of a per-build pod and
//! is wrapped in a backend stage named `step-{stage}-{step}`; the syncer
//! relies on that naming to map workflow stages back onto the status tree.

use std::collections::BTreeMap;

use weir_core::domain::execution::PipelineExecution;
use weir_core::domain::pipeline::{PublishImageConfig, RunScriptConfig, SourceCodeConfig, Step};
use weir_core::env::{build_env, interpolate};
use weir_core::image::{DEFAULT_REGISTRY, split_image_tag};

use super::sync::step_name;
use crate::engine::Result;

/// Image the checkout step runs in
pub const GIT_IMAGE: &str = "alpine/git:2.45.2";

/// Image publish steps build and push with
pub const DOCKER_PLUGIN_IMAGE: &str = "plugins/docker:20.18";

const DEFAULT_TIMEOUT_MINUTES: u32 = 60;

/// Local branch the checkout lands on
const CHECKOUT_BRANCH: &str = "local/temp";

/// Name of the scoped secret holding the credentials of `registry`
pub fn registry_secret_name(namespace: &str, registry: &str) -> String {
    let sanitized: String = registry
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    format!("{}-{}", namespace, sanitized)
}

/// Registries referenced by the publish steps of `execution`
pub fn publish_registries(execution: &PipelineExecution) -> Vec<String> {
    let env = build_env(execution);
    let mut registries: Vec<String> = execution
        .spec
        .pipeline_config
        .stages
        .iter()
        .flat_map(|stage| &stage.steps)
        .filter_map(|step| match step {
            Step::PublishImage(config) => {
                let (registry, _, _) = split_image_tag(&interpolate(&config.tag, &env));
                Some(registry)
            }
            _ => None,
        })
        .collect();
    registries.sort();
    registries.dedup();
    registries
}

// =============================================================================
// Script
// =============================================================================

/// Single-quoted groovy string literal
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn env_vars(vars: &BTreeMap<String, String>) -> Vec<String> {
    vars.iter()
        .map(|(k, v)| format!("envVar(key: {}, value: {})", quote(k), quote(v)))
        .collect()
}

/// Container definition and shell body of one step
struct StepUnit {
    container: String,
    body: String,
}

/// Compiles executions into backend pipeline scripts
pub struct Converter<'a> {
    execution: &'a PipelineExecution,
    env: BTreeMap<String, String>,
}

impl<'a> Converter<'a> {
    pub fn new(execution: &'a PipelineExecution) -> Self {
        Self {
            execution,
            env: build_env(execution),
        }
    }

    /// The scripted pipeline for the execution
    pub fn pipeline_script(&self) -> Result<String> {
        // Rejects snapshots that cannot be checked out before emitting anything
        self.execution.spec.pipeline_config.source_code_config()?;

        let config = &self.execution.spec.pipeline_config;
        let mut containers = Vec::new();
        let mut stages = String::new();

        for (i, stage) in config.stages.iter().enumerate() {
            let mut branches = Vec::with_capacity(stage.steps.len());
            for (j, step) in stage.steps.iter().enumerate() {
                let name = step_name(i, j);
                let unit = self.step_unit(&name, step);
                containers.push(unit.container);
                branches.push(format!(
                    "{}: {{\n                stage({}) {{\n                    container(name: {}) {{\n{}                    }}\n                }}\n            }}",
                    quote(&name),
                    quote(&name),
                    quote(&name),
                    unit.body
                ));
            }

            stages.push_str(&format!(
                "        stage({}) {{\n            parallel(\n            {}\n            )\n        }}\n",
                quote(&stage.name),
                branches.join(",\n            ")
            ));
        }

        let timeout = config.timeout_minutes.unwrap_or(DEFAULT_TIMEOUT_MINUTES);
        Ok(format!(
            "def label = \"buildpod.${{env.JOB_NAME}}.${{env.BUILD_NUMBER}}\".replace('-', '_').replace('/', '_')\n\
             podTemplate(label: label, containers: [\n    \
             {}\n\
             ]) {{\n    \
             node(label) {{\n    \
             timestamps {{\n    \
             timeout({}) {{\n\
             {}    }}\n    }}\n    }}\n}}\n",
            containers.join(",\n    "),
            timeout,
            stages
        ))
    }

    /// The script wrapped in a job definition document
    pub fn job_config(&self) -> Result<String> {
        let script = self.pipeline_script()?;
        let spec = &self.execution.spec;
        let pipeline = if spec.pipeline_display_name.is_empty() {
            spec.pipeline_name.name.as_str()
        } else {
            spec.pipeline_display_name.as_str()
        };
        let description = format!(
            "{} run {} ({})",
            pipeline,
            spec.run,
            self.execution.meta.reference()
        );
        Ok(flow_definition(&description, &script))
    }

    fn step_unit(&self, name: &str, step: &Step) -> StepUnit {
        match step {
            Step::SourceCode(config) => self.checkout_unit(name, config),
            Step::RunScript(config) => self.run_script_unit(name, config),
            Step::PublishImage(config) => self.publish_image_unit(name, config),
        }
    }

    fn container(&self, name: &str, image: &str, privileged: bool, env: Vec<String>) -> String {
        let mut container = format!(
            "containerTemplate(name: {}, image: {}, ttyEnabled: true, command: 'cat'",
            quote(name),
            quote(image)
        );
        if privileged {
            container.push_str(", privileged: true");
        }
        container.push_str(&format!(", envVars: [{}])", env.join(", ")));
        container
    }

    fn checkout_unit(&self, name: &str, config: &SourceCodeConfig) -> StepUnit {
        let spec = &self.execution.spec;
        let url = if config.url.is_empty() {
            spec.repository_url.as_str()
        } else {
            config.url.as_str()
        };
        let branch = self.execution.branch().unwrap_or_default();
        let source = match &spec.git_ref {
            Some(git_ref) => git_ref.clone(),
            None => format!("refs/heads/{}", branch),
        };
        let refspec = format!("+{}:refs/remotes/{}", source, CHECKOUT_BRANCH);

        let mut remote = format!("url: {}, refspec: {}", quote(url), quote(&refspec));
        if let Some(credential) = &config.source_code_credential_name {
            remote.push_str(&format!(", credentialsId: {}", quote(&credential.to_string())));
        }

        let mut body = format!(
            "                        checkout([$class: 'GitSCM', branches: [[name: {}]], userRemoteConfigs: [[{}]]])\n",
            quote(CHECKOUT_BRANCH),
            remote
        );
        if let Some(commit) = &spec.commit {
            body.push_str(&format!(
                "                        sh {}\n",
                quote(&format!("git checkout {}", commit))
            ));
        }

        StepUnit {
            container: self.container(name, GIT_IMAGE, false, env_vars(&self.env)),
            body,
        }
    }

    fn run_script_unit(&self, name: &str, config: &RunScriptConfig) -> StepUnit {
        let image = interpolate(&config.image, &self.env);

        let mut vars = self.env.clone();
        for (k, v) in &config.env {
            vars.insert(k.clone(), interpolate(v, &self.env));
        }

        let script = if config.shell_script.is_empty() {
            [config.entrypoint.as_deref(), config.command.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ")
        } else {
            config.shell_script.clone()
        };

        StepUnit {
            container: self.container(name, &image, false, env_vars(&vars)),
            body: format!("                        sh {}\n", quote(&script)),
        }
    }

    fn publish_image_unit(&self, name: &str, config: &PublishImageConfig) -> StepUnit {
        let tag = interpolate(&config.tag, &self.env);
        let (registry, repo, image_tag) = split_image_tag(&tag);

        let mut vars = self.env.clone();
        for (k, v) in &config.env {
            vars.insert(k.clone(), interpolate(v, &self.env));
        }

        // The docker plugin logs in to the public registry only when the field is blank
        let (plugin_registry, plugin_repo) = if registry == DEFAULT_REGISTRY {
            (String::new(), repo)
        } else {
            (registry.clone(), format!("{}/{}", registry, repo))
        };
        vars.insert("PLUGIN_REPO".to_string(), plugin_repo);
        vars.insert("PLUGIN_TAG".to_string(), image_tag);
        vars.insert("PLUGIN_DOCKERFILE".to_string(), config.dockerfile_path.clone());
        vars.insert("PLUGIN_CONTEXT".to_string(), config.build_context.clone());
        vars.insert("PLUGIN_REGISTRY".to_string(), plugin_registry);

        let secret = registry_secret_name(&self.execution.meta.namespace, &registry);
        let mut env = env_vars(&vars);
        for (key, secret_key) in [("DOCKER_USERNAME", "username"), ("DOCKER_PASSWORD", "password")] {
            env.push(format!(
                "secretEnvVar(key: {}, secretName: {}, secretKey: {})",
                quote(key),
                quote(&secret),
                quote(secret_key)
            ));
        }

        StepUnit {
            container: self.container(name, DOCKER_PLUGIN_IMAGE, true, env),
            body: "                        sh '/usr/local/bin/dockerd-entrypoint.sh /bin/drone-docker'\n"
                .to_string(),
        }
    }
}

// =============================================================================
// Job definition
// =============================================================================

fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Pipeline job document carrying `script`
pub fn flow_definition(description: &str, script: &str) -> String {
    format!(
        r#"<?xml version='1.1' encoding='UTF-8'?>
<flow-definition plugin="workflow-job">
  <description>{}</description>
  <keepDependencies>false</keepDependencies>
  <definition class="org.jenkinsci.plugins.workflow.cps.CpsFlowDefinition" plugin="workflow-cps">
    <script>{}</script>
    <sandbox>false</sandbox>
  </definition>
  <disabled>false</disabled>
</flow-definition>
"#,
        xml_escape(description),
        xml_escape(script)
    )
}
