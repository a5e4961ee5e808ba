//! Cloud Run Admin API v2 provider.
//!
//! Services live under `projects/{project}/locations/{location}`. Mutating
//! calls return long-running operations which are polled until done or
//! until `operation_timeout` elapses. List calls follow `nextPageToken`
//! until exhausted; all revisions are fetched in one paginated sweep using
//! the `-` service wildcard.

mod token;
mod wire;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use warmpool_core::{RevisionObservation, RevisionTemplate, ServiceObservation};

use crate::error::{ProviderError, ProviderErrorKind, ProviderOperation, ProviderResult};
use crate::provider::Provider;

pub use token::TokenSource;
use wire::{
    Binding, ErrorBody, ListRevisionsResponse, ListServicesResponse, Operation, Policy, Service,
    ServiceTemplate, SetIamPolicyRequest,
};

const PAGE_SIZE: u32 = 100;

/// Connection settings for [`CloudRunProvider`].
#[derive(Debug, Clone)]
pub struct CloudRunConfig {
    /// API base URL, normally `https://run.googleapis.com`.
    pub endpoint: String,
    pub project: String,
    pub location: String,
    pub operation_poll: Duration,
    pub operation_timeout: Duration,
}

/// Provider backed by the Cloud Run Admin API.
pub struct CloudRunProvider {
    http: reqwest::Client,
    tokens: TokenSource,
    config: CloudRunConfig,
    parent: String,
}

impl CloudRunProvider {
    pub fn new(config: CloudRunConfig, tokens: TokenSource) -> ProviderResult<Self> {
        let parent = format!("projects/{}/locations/{}", config.project, config.location);
        let http = reqwest::Client::builder()
            .user_agent(concat!("warmpool/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                ProviderError::new(
                    ProviderOperation::List,
                    &parent,
                    ProviderErrorKind::Transport(e.to_string()),
                )
            })?;

        Ok(Self {
            http,
            tokens,
            config,
            parent,
        })
    }

    /// `projects/{project}/locations/{location}`.
    pub fn parent(&self) -> &str {
        &self.parent
    }

    fn service_resource(&self, name: &str) -> String {
        format!("{}/services/{name}", self.parent)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2/{path}", self.config.endpoint.trim_end_matches('/'))
    }

    // ── HTTP plumbing ───────────────────────────────────────────────

    async fn call<B, R>(
        &self,
        operation: ProviderOperation,
        target: &str,
        method: Method,
        url: String,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> ProviderResult<R>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let fail = |kind| ProviderError::new(operation, target, kind);

        let token = self.tokens.token(&self.http).await.map_err(fail)?;
        let mut request = self
            .http
            .request(method, url.as_str())
            .bearer_auth(token)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| fail(ProviderErrorKind::Transport(e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(fail(status_kind(status, &text)));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| fail(ProviderErrorKind::Decode(e.to_string())))
    }

    /// Poll a long-running operation until it completes.
    async fn wait(
        &self,
        operation: ProviderOperation,
        target: &str,
        mut op: Operation,
    ) -> ProviderResult<Option<serde_json::Value>> {
        let deadline = Instant::now() + self.config.operation_timeout;

        while !op.done {
            if Instant::now() >= deadline {
                return Err(ProviderError::new(operation, target, ProviderErrorKind::Timeout));
            }
            tokio::time::sleep(self.config.operation_poll).await;
            debug!(%operation, target, op = %op.name, "polling operation");
            let url = self.url(&op.name);
            op = self
                .call::<(), Operation>(operation, target, Method::GET, url, &[], None)
                .await?;
        }

        if let Some(status) = op.error {
            let reason = format!("code {}: {}", status.code, status.message);
            return Err(ProviderError::new(
                operation,
                target,
                ProviderErrorKind::OperationFailed(reason),
            ));
        }
        Ok(op.response)
    }

    async fn get_service(
        &self,
        operation: ProviderOperation,
        name: &str,
    ) -> ProviderResult<Service> {
        self.call::<(), Service>(
            operation,
            name,
            Method::GET,
            self.url(&self.service_resource(name)),
            &[],
            None,
        )
        .await
    }
}

fn status_kind(status: StatusCode, body: &str) -> ProviderErrorKind {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.to_string());

    match status {
        StatusCode::NOT_FOUND => ProviderErrorKind::NotFound,
        StatusCode::CONFLICT => ProviderErrorKind::AlreadyExists,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderErrorKind::Auth(message),
        _ => ProviderErrorKind::Status {
            code: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl Provider for CloudRunProvider {
    async fn create(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        revision: &RevisionTemplate,
    ) -> ProviderResult<ServiceObservation> {
        let op = ProviderOperation::Create;
        info!(service = name, "start create service");

        let body = Service::for_create(name, labels, revision);
        let pending: Operation = self
            .call(
                op,
                name,
                Method::POST,
                self.url(&format!("{}/services", self.parent)),
                &[("serviceId", name.to_string())],
                Some(&body),
            )
            .await?;
        let response = self.wait(op, name, pending).await?;

        let service = match response {
            Some(value) => serde_json::from_value::<Service>(value).map_err(|e| {
                ProviderError::new(op, name, ProviderErrorKind::Decode(e.to_string()))
            })?,
            None => self.get_service(op, name).await?,
        };

        info!(service = name, "finished create service");
        Ok(service.into_observation())
    }

    async fn list(&self) -> ProviderResult<Vec<ServiceObservation>> {
        let op = ProviderOperation::List;
        let url = self.url(&format!("{}/services", self.parent));
        let mut services = Vec::new();
        let mut page_token = String::new();

        loop {
            let mut query = vec![("pageSize", PAGE_SIZE.to_string())];
            if !page_token.is_empty() {
                query.push(("pageToken", page_token.clone()));
            }
            let page: ListServicesResponse = self
                .call::<(), _>(op, &self.parent, Method::GET, url.clone(), &query, None)
                .await?;

            services.extend(page.services.into_iter().map(Service::into_observation));
            if page.next_page_token.is_empty() {
                break;
            }
            page_token = page.next_page_token;
        }

        debug!(count = services.len(), "listed services");
        Ok(services)
    }

    async fn list_revisions(&self, service: &str) -> ProviderResult<Vec<RevisionObservation>> {
        let url = self.url(&format!("{}/revisions", self.service_resource(service)));
        self.list_revisions_at(service, url).await
    }

    async fn list_all_revisions(&self) -> ProviderResult<Vec<RevisionObservation>> {
        let url = self.url(&format!("{}/revisions", self.service_resource("-")));
        self.list_revisions_at(&self.parent, url).await
    }

    async fn update(&self, name: &str, revision: &RevisionTemplate) -> ProviderResult<()> {
        let op = ProviderOperation::Update;
        info!(service = name, revision = %revision.name, "start update service");

        // Read-modify-write so labels and other fields survive the PATCH.
        let mut service = self.get_service(op, name).await?;
        let template_labels = service
            .template
            .as_ref()
            .map(|t| t.labels.clone())
            .unwrap_or_else(|| service.labels.clone());
        service.template = Some(ServiceTemplate::from_template(name, &template_labels, revision));

        let resource = self.service_resource(name);
        let pending: Operation = self
            .call(op, name, Method::PATCH, self.url(&resource), &[], Some(&service))
            .await?;
        self.wait(op, name, pending).await?;

        info!(service = name, "finished update service");
        Ok(())
    }

    async fn delete(&self, name: &str) -> ProviderResult<()> {
        let op = ProviderOperation::Delete;
        info!(service = name, "start delete service");

        let pending: Operation = self
            .call::<(), _>(
                op,
                name,
                Method::DELETE,
                self.url(&self.service_resource(name)),
                &[],
                None,
            )
            .await?;
        self.wait(op, name, pending).await?;

        info!(service = name, "finished delete service");
        Ok(())
    }

    async fn grant_public_access(&self, name: &str) -> ProviderResult<()> {
        let op = ProviderOperation::GrantPublicAccess;
        let body = SetIamPolicyRequest {
            policy: Policy {
                bindings: vec![Binding {
                    role: wire::INVOKER_ROLE.to_string(),
                    members: vec![wire::ALL_USERS.to_string()],
                }],
            },
        };

        let url = self.url(&format!("{}:setIamPolicy", self.service_resource(name)));
        self.call::<_, serde_json::Value>(op, name, Method::POST, url, &[], Some(&body))
            .await?;

        debug!(service = name, "granted public access");
        Ok(())
    }
}

impl CloudRunProvider {
    async fn list_revisions_at(
        &self,
        target: &str,
        url: String,
    ) -> ProviderResult<Vec<RevisionObservation>> {
        let op = ProviderOperation::ListRevisions;
        let mut revisions = Vec::new();
        let mut page_token = String::new();

        loop {
            let mut query = vec![("pageSize", PAGE_SIZE.to_string())];
            if !page_token.is_empty() {
                query.push(("pageToken", page_token.clone()));
            }
            let page: ListRevisionsResponse = self
                .call::<(), _>(op, target, Method::GET, url.clone(), &query, None)
                .await?;

            revisions.extend(page.revisions.into_iter().map(wire::Revision::into_observation));
            if page.next_page_token.is_empty() {
                break;
            }
            page_token = page.next_page_token;
        }

        debug!(target, count = revisions.len(), "listed revisions");
        Ok(revisions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> CloudRunProvider {
        CloudRunProvider::new(
            CloudRunConfig {
                endpoint: "https://run.googleapis.com/".to_string(),
                project: "acme".to_string(),
                location: "us-central1".to_string(),
                operation_poll: Duration::from_millis(10),
                operation_timeout: Duration::from_secs(1),
            },
            TokenSource::Static("token".to_string()),
        )
        .unwrap()
    }

    #[test]
    fn resource_paths() {
        let p = provider();
        assert_eq!(p.parent(), "projects/acme/locations/us-central1");
        assert_eq!(
            p.url(&p.service_resource("web-1")),
            "https://run.googleapis.com/v2/projects/acme/locations/us-central1/services/web-1"
        );
        assert_eq!(
            p.url(&format!("{}/revisions", p.service_resource("-"))),
            "https://run.googleapis.com/v2/projects/acme/locations/us-central1/services/-/revisions"
        );
    }

    #[test]
    fn status_mapping() {
        let body = r#"{ "error": { "code": 429, "message": "quota exceeded" } }"#;
        assert_eq!(status_kind(StatusCode::NOT_FOUND, ""), ProviderErrorKind::NotFound);
        assert_eq!(status_kind(StatusCode::CONFLICT, ""), ProviderErrorKind::AlreadyExists);
        assert!(matches!(
            status_kind(StatusCode::FORBIDDEN, "denied"),
            ProviderErrorKind::Auth(m) if m == "denied"
        ));
        assert_eq!(
            status_kind(StatusCode::TOO_MANY_REQUESTS, body),
            ProviderErrorKind::Status {
                code: 429,
                message: "quota exceeded".to_string()
            }
        );
    }

    #[tokio::test]
    async fn finished_operation_error_is_reported() {
        let p = provider();
        let op = Operation {
            name: "operations/1".to_string(),
            done: true,
            error: Some(wire::Status {
                code: 9,
                message: "image not found".to_string(),
            }),
            response: None,
        };
        let err = p.wait(ProviderOperation::Create, "web-1", op).await.unwrap_err();
        assert!(matches!(err.kind, ProviderErrorKind::OperationFailed(_)));
        assert_eq!(err.target, "web-1");
    }
}
