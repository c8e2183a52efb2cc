//! Deployment API client

use openapi_client::{DeploymentResultRequest, DeploymentResultResponse};
use tracing::info;

use crate::errors::AgentError;
use crate::http::client::{HttpClient, DEFAULT_TIMEOUT};

impl HttpClient {
    /// Report the outcome of a deploy or rollback command
    pub async fn report_result(
        &self,
        deployment_id: &str,
        request: &DeploymentResultRequest,
    ) -> Result<DeploymentResultResponse, AgentError> {
        let path = format!("/deployments/{}/result", deployment_id);
        let response: DeploymentResultResponse = self.post(&path, request, DEFAULT_TIMEOUT).await?;
        info!(
            "Reported {} for deployment {}",
            request.status, deployment_id
        );
        Ok(response)
    }
}
