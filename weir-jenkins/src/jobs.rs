//! Job definition and lifecycle endpoints

use reqwest::Method;
use reqwest::header::CONTENT_TYPE;

use crate::JenkinsClient;
use crate::error::Result;
use crate::types::JobInfo;

impl JenkinsClient {
    // =============================================================================
    // Job Definitions
    // =============================================================================

    /// Create a job from a job-config document
    ///
    /// # Arguments
    /// * `name` - The job name
    /// * `config_xml` - The job configuration document
    pub async fn create_job(&self, name: &str, config_xml: &str) -> Result<()> {
        let response = self
            .request(Method::POST, "/createItem")
            .query(&[("name", name)])
            .header(CONTENT_TYPE, "application/xml")
            .body(config_xml.to_string())
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Replace the configuration of an existing job
    pub async fn update_job(&self, name: &str, config_xml: &str) -> Result<()> {
        let path = format!("{}/config.xml", Self::job_path(name));
        let response = self
            .request(Method::POST, &path)
            .header(CONTENT_TYPE, "application/xml")
            .body(config_xml.to_string())
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Get a job's queue state and last build
    ///
    /// # Returns
    /// The job info, or `ClientError::NotFound` when no such job exists
    pub async fn get_job_info(&self, name: &str) -> Result<JobInfo> {
        let path = format!("{}/api/json", Self::job_path(name));
        let response = self.request(Method::GET, &path).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Builds
    // =============================================================================

    /// Trigger a build of the job
    pub async fn build_job(&self, name: &str) -> Result<()> {
        let path = format!("{}/build", Self::job_path(name));
        let response = self.request(Method::POST, &path).send().await?;

        self.handle_empty_response(response).await
    }

    /// Stop a running build
    ///
    /// # Arguments
    /// * `name` - The job name
    /// * `build_number` - The number of the running build
    pub async fn stop_build(&self, name: &str, build_number: u64) -> Result<()> {
        let path = format!("{}/{}/stop", Self::job_path(name), build_number);
        let response = self.request(Method::POST, &path).send().await?;

        self.handle_empty_response(response).await
    }

    /// Cancel a queued build before it starts
    pub async fn cancel_queue_item(&self, id: u64) -> Result<()> {
        let response = self
            .request(Method::POST, "/queue/cancelItem")
            .query(&[("id", id)])
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}
