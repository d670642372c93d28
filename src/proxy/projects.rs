use std::sync::Arc;

use super::upstream::{ProjectsRequest, UpstreamClient};
use crate::errors::AppResult;
use crate::models::project::require_id;
use crate::models::{ProjectInput, Provider};
use crate::tokens::TokenManager;

/// Project operations against the Zoho Projects API.
///
/// Each call fetches a valid token, resolves the resource host from that
/// token's metadata, and retries once after a forced refresh if the resource
/// server rejects the token.
pub struct ProjectsProxy {
    tokens: Arc<TokenManager>,
    upstream: UpstreamClient,
}

impl ProjectsProxy {
    pub fn new(tokens: Arc<TokenManager>, upstream: UpstreamClient) -> Self {
        Self { tokens, upstream }
    }

    pub async fn list_portals(&self) -> AppResult<serde_json::Value> {
        self.call(ProjectsRequest::ListPortals).await
    }

    pub async fn list_projects(&self, portal_id: &str) -> AppResult<serde_json::Value> {
        require_id("Portal ID", portal_id)?;
        self.call(ProjectsRequest::ListProjects {
            portal_id: portal_id.to_string(),
        })
        .await
    }

    pub async fn get_project(&self, portal_id: &str, project_id: &str) -> AppResult<serde_json::Value> {
        require_id("Portal ID", portal_id)?;
        require_id("Project ID", project_id)?;
        self.call(ProjectsRequest::GetProject {
            portal_id: portal_id.to_string(),
            project_id: project_id.to_string(),
        })
        .await
    }

    pub async fn create_project(
        &self,
        portal_id: &str,
        input: &ProjectInput,
    ) -> AppResult<serde_json::Value> {
        require_id("Portal ID", portal_id)?;
        let form = input.validate()?;
        tracing::info!(portal_id, project_name = %form.name, "creating project");
        self.call(ProjectsRequest::CreateProject {
            portal_id: portal_id.to_string(),
            form,
        })
        .await
    }

    pub async fn update_project(
        &self,
        portal_id: &str,
        project_id: &str,
        input: &ProjectInput,
    ) -> AppResult<serde_json::Value> {
        require_id("Portal ID", portal_id)?;
        require_id("Project ID", project_id)?;
        let form = input.validate()?;
        tracing::info!(portal_id, project_id, project_name = %form.name, "updating project");
        self.call(ProjectsRequest::UpdateProject {
            portal_id: portal_id.to_string(),
            project_id: project_id.to_string(),
            form,
        })
        .await
    }

    pub async fn delete_project(&self, portal_id: &str, project_id: &str) -> AppResult<serde_json::Value> {
        require_id("Portal ID", portal_id)?;
        require_id("Project ID", project_id)?;
        tracing::info!(portal_id, project_id, "deleting project");
        self.call(ProjectsRequest::DeleteProject {
            portal_id: portal_id.to_string(),
            project_id: project_id.to_string(),
        })
        .await
    }

    async fn call(&self, request: ProjectsRequest) -> AppResult<serde_json::Value> {
        let oauth = self.tokens.oauth(Provider::Zoho)?;
        let record = self.tokens.get_valid_record(Provider::Zoho).await?;
        let base = oauth.resource_base(&record.metadata);

        match self.upstream.execute(&base, &record.access_token, &request).await {
            Err(e) if e.is_auth_failure() => {
                tracing::warn!(
                    operation = request.operation(),
                    token_id = %record.id,
                    "resource server rejected token; refreshing once"
                );
                let record = self
                    .tokens
                    .refresh_rejected(Provider::Zoho, &record.access_token)
                    .await?;
                let base = oauth.resource_base(&record.metadata);
                self.upstream.execute(&base, &record.access_token, &request).await
            }
            other => other,
        }
    }
}
