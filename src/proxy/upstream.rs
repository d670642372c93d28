//! HTTP client for the provider's resource endpoints.
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Method;
use url::Url;

use crate::errors::{AppError, AppResult};
use crate::middleware::metrics::Metrics;
use crate::models::ProjectForm;

/// Shared outbound client. Used for both token and resource calls.
pub fn http_client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .use_rustls_tls()
        .pool_max_idle_per_host(16)
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(5))
        .build()?)
}

/// One resource call against the projects service.
#[derive(Debug, Clone)]
pub enum ProjectsRequest {
    ListPortals,
    ListProjects {
        portal_id: String,
    },
    GetProject {
        portal_id: String,
        project_id: String,
    },
    CreateProject {
        portal_id: String,
        form: ProjectForm,
    },
    UpdateProject {
        portal_id: String,
        project_id: String,
        form: ProjectForm,
    },
    DeleteProject {
        portal_id: String,
        project_id: String,
    },
}

impl ProjectsRequest {
    pub fn operation(&self) -> &'static str {
        match self {
            ProjectsRequest::ListPortals => "list_portals",
            ProjectsRequest::ListProjects { .. } => "list_projects",
            ProjectsRequest::GetProject { .. } => "get_project",
            ProjectsRequest::CreateProject { .. } => "create_project",
            ProjectsRequest::UpdateProject { .. } => "update_project",
            ProjectsRequest::DeleteProject { .. } => "delete_project",
        }
    }

    /// Zoho takes updates as a POST to the project URL.
    pub fn method(&self) -> Method {
        match self {
            ProjectsRequest::CreateProject { .. } | ProjectsRequest::UpdateProject { .. } => {
                Method::POST
            }
            ProjectsRequest::DeleteProject { .. } => Method::DELETE,
            _ => Method::GET,
        }
    }

    /// Path segments under the base URL. The trailing empty segment keeps
    /// the trailing slash the API expects.
    fn segments(&self) -> Vec<&str> {
        match self {
            ProjectsRequest::ListPortals => vec!["restapi", "portals", ""],
            ProjectsRequest::ListProjects { portal_id }
            | ProjectsRequest::CreateProject { portal_id, .. } => {
                vec!["restapi", "portal", portal_id.as_str(), "projects", ""]
            }
            ProjectsRequest::GetProject { portal_id, project_id }
            | ProjectsRequest::UpdateProject { portal_id, project_id, .. }
            | ProjectsRequest::DeleteProject { portal_id, project_id } => {
                vec!["restapi", "portal", portal_id.as_str(), "projects", project_id.as_str(), ""]
            }
        }
    }

    /// Full resource URL. Ids are percent-encoded as single path segments.
    pub fn url(&self, base: &str) -> AppResult<Url> {
        let mut url = Url::parse(base)
            .map_err(|e| anyhow::anyhow!("invalid resource base URL {}: {}", base, e))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("resource base URL {} cannot carry a path", base))?
            .pop_if_empty()
            .extend(self.segments());
        Ok(url)
    }

    fn form(&self) -> Option<&ProjectForm> {
        match self {
            ProjectsRequest::CreateProject { form, .. }
            | ProjectsRequest::UpdateProject { form, .. } => Some(form),
            _ => None,
        }
    }
}

pub struct UpstreamClient {
    client: reqwest::Client,
    metrics: Arc<Metrics>,
}

impl UpstreamClient {
    pub fn new(client: reqwest::Client, metrics: Arc<Metrics>) -> Self {
        Self { client, metrics }
    }

    /// Issues `request` with `access_token`. Non-2xx statuses become
    /// `UpstreamRequestFailed`; an empty success body becomes `null`.
    pub async fn execute(
        &self,
        base: &str,
        access_token: &str,
        request: &ProjectsRequest,
    ) -> AppResult<serde_json::Value> {
        let url = request.url(base)?;
        let operation = request.operation();

        let mut builder = self
            .client
            .request(request.method(), url.clone())
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Zoho-oauthtoken {}", access_token),
            )
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(form) = request.form() {
            // Multipart bodies are single-use, so each attempt builds its own.
            let multipart = form
                .fields()
                .into_iter()
                .fold(reqwest::multipart::Form::new(), |f, (k, v)| f.text(k, v));
            builder = builder.multipart(multipart);
        }

        let started = Instant::now();
        let resp = builder.send().await.map_err(|e| {
            self.metrics
                .record_upstream(operation, 0, started.elapsed().as_secs_f64());
            tracing::warn!(operation, url = %url, "upstream request failed: {}", e);
            AppError::Upstream(e.to_string())
        })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AppError::Upstream(format!("failed to read upstream body: {}", e)))?;
        self.metrics
            .record_upstream(operation, status.as_u16(), started.elapsed().as_secs_f64());

        if !status.is_success() {
            tracing::warn!(
                operation,
                status = status.as_u16(),
                "upstream returned an error status"
            );
            return Err(AppError::UpstreamRequestFailed {
                status: status.as_u16(),
                body,
            });
        }

        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body).or_else(|_| Ok(serde_json::Value::String(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_keep_trailing_slash() {
        let base = "https://projectsapi.zoho.eu";
        assert_eq!(
            ProjectsRequest::ListPortals.url(base).unwrap().as_str(),
            "https://projectsapi.zoho.eu/restapi/portals/"
        );
        let get = ProjectsRequest::GetProject {
            portal_id: "7890".into(),
            project_id: "1234".into(),
        };
        assert_eq!(
            get.url(base).unwrap().as_str(),
            "https://projectsapi.zoho.eu/restapi/portal/7890/projects/1234/"
        );
    }

    #[test]
    fn test_ids_cannot_escape_their_segment() {
        let req = ProjectsRequest::ListProjects {
            portal_id: "../../admin".into(),
        };
        let url = req.url("https://projectsapi.zoho.com").unwrap();
        assert!(url.path().starts_with("/restapi/portal/"));
        assert!(!url.path().contains("/admin/"));
    }

    #[test]
    fn test_methods() {
        let pid = || "1".to_string();
        assert_eq!(ProjectsRequest::ListPortals.method(), Method::GET);
        assert_eq!(
            ProjectsRequest::DeleteProject { portal_id: pid(), project_id: pid() }.method(),
            Method::DELETE
        );
    }
}
