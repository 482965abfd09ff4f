//! Provisioning API client.
//!
//! Thin typed surface over the remote REST API. Every call is routed
//! through the retrying [`Transport`]; no component in this crate performs
//! unretried network calls.

use reqwest::{Method, RequestBuilder, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;
use crate::models::{
    CapacityInput, CapacityReport, CapacityReportResponse, Device, DeviceActionRequest,
    DeviceCreateRequest, DeviceUpdateRequest, DevicesList, FacilitiesList, Facility, Project,
    ProjectsList, Volume, VolumesList,
};
use crate::transport::{RetryConfig, Transport};

/// Production API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.packet.net";

/// Header carrying the operator's API token.
const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Header identifying the consuming integration.
const CONSUMER_TOKEN_HEADER: &str = "X-Consumer-Token";

/// Client for the provisioning API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    transport: Transport,
    base_url: String,
    auth_token: String,
    consumer_token: Option<String>,
}

impl ApiClient {
    /// Create a client against the production endpoint with default retry
    /// behavior.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(auth_token: impl Into<String>) -> Result<Self, Error> {
        Ok(Self::with_transport(
            Transport::new(RetryConfig::default())?,
            auth_token,
        ))
    }

    /// Create a client over an explicitly constructed transport.
    #[must_use]
    pub fn with_transport(transport: Transport, auth_token: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_token: auth_token.into(),
            consumer_token: None,
        }
    }

    /// Point the client at a different endpoint, e.g. a test server.
    ///
    /// # Errors
    /// Returns a validation error when the URL does not parse.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, Error> {
        let parsed = Url::parse(base_url)
            .map_err(|e| Error::Validation(format!("invalid base URL \"{base_url}\": {e}")))?;
        self.base_url = parsed.as_str().trim_end_matches('/').to_string();
        Ok(self)
    }

    /// Attach a consumer token sent alongside the auth token.
    #[must_use]
    pub fn with_consumer_token(mut self, consumer_token: impl Into<String>) -> Self {
        self.consumer_token = Some(consumer_token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self
            .transport
            .client()
            .request(method, self.url(path))
            .header(AUTH_TOKEN_HEADER, &self.auth_token);
        if let Some(consumer_token) = &self.consumer_token {
            builder = builder.header(CONSUMER_TOKEN_HEADER, consumer_token);
        }
        builder
    }

    /// Make a GET request.
    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<T, Error> {
        debug!(path = %path, "GET request");
        let response = self
            .transport
            .execute(self.request(Method::GET, path), cancel)
            .await?;
        Self::handle_response(response).await
    }

    /// Make a POST request with a JSON body.
    async fn post<T, B>(&self, path: &str, body: &B, cancel: &CancellationToken) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize,
    {
        debug!(path = %path, "POST request");
        let response = self
            .transport
            .execute(self.request(Method::POST, path).json(body), cancel)
            .await?;
        Self::handle_response(response).await
    }

    /// Make a POST request whose response body is ignored.
    async fn post_empty<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        debug!(path = %path, "POST request (empty response)");
        let response = self
            .transport
            .execute(self.request(Method::POST, path).json(body), cancel)
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(Error::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    /// Make a PATCH request with a JSON body.
    async fn patch<T, B>(
        &self,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize,
    {
        debug!(path = %path, "PATCH request");
        let response = self
            .transport
            .execute(self.request(Method::PATCH, path).json(body), cancel)
            .await?;
        Self::handle_response(response).await
    }

    /// Make a DELETE request. A missing resource counts as deleted.
    async fn delete(&self, path: &str, cancel: &CancellationToken) -> Result<(), Error> {
        debug!(path = %path, "DELETE request");
        let response = self
            .transport
            .execute(self.request(Method::DELETE, path), cancel)
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(Error::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    /// Handle an API response, parsing JSON or classifying the error.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, Error> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, body = %text, "failed to parse response");
                Error::Serialization(e)
            })
        } else if status == StatusCode::NOT_FOUND {
            Err(Error::NotFound(text))
        } else {
            Err(Error::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    // ========================================================================
    // Devices
    // ========================================================================

    /// Create a device in a project.
    ///
    /// # Errors
    /// Returns an error when the creation call fails.
    pub async fn create_device(
        &self,
        project_id: &str,
        request: &DeviceCreateRequest,
        cancel: &CancellationToken,
    ) -> Result<Device, Error> {
        self.post(&format!("/projects/{project_id}/devices"), request, cancel)
            .await
    }

    /// Get a device by ID.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for an unknown ID.
    pub async fn get_device(&self, id: &str, cancel: &CancellationToken) -> Result<Device, Error> {
        self.get(&format!("/devices/{id}"), cancel).await
    }

    /// List all devices in a project.
    ///
    /// # Errors
    /// Returns an error when the list call fails.
    pub async fn list_devices(
        &self,
        project_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Device>, Error> {
        let list: DevicesList = self
            .get(&format!("/projects/{project_id}/devices"), cancel)
            .await?;
        Ok(list.devices)
    }

    /// Update a device. Currently only the lock state is mutable here.
    ///
    /// # Errors
    /// Returns an error when the update call fails.
    pub async fn update_device(
        &self,
        id: &str,
        request: &DeviceUpdateRequest,
        cancel: &CancellationToken,
    ) -> Result<Device, Error> {
        self.patch(&format!("/devices/{id}"), request, cancel).await
    }

    /// Delete a device. Deleting an already-absent device succeeds.
    ///
    /// # Errors
    /// Returns an error when the deletion call fails.
    pub async fn delete_device(&self, id: &str, cancel: &CancellationToken) -> Result<(), Error> {
        self.delete(&format!("/devices/{id}"), cancel).await
    }

    /// Issue a power action against a device.
    ///
    /// # Errors
    /// Returns an error when the action call fails.
    pub async fn device_action(
        &self,
        id: &str,
        action_type: &str,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let body = DeviceActionRequest {
            action_type: action_type.to_string(),
        };
        self.post_empty(&format!("/devices/{id}/actions"), &body, cancel)
            .await
    }

    // ========================================================================
    // Facilities and capacity
    // ========================================================================

    /// List all facilities.
    ///
    /// # Errors
    /// Returns an error when the list call fails.
    pub async fn list_facilities(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Facility>, Error> {
        let list: FacilitiesList = self.get("/facilities", cancel).await?;
        Ok(list.facilities)
    }

    /// Look a facility up by code.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for an unknown code.
    pub async fn get_facility(
        &self,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<Facility, Error> {
        let facilities = self.list_facilities(cancel).await?;
        facilities
            .into_iter()
            .find(|f| f.code == code)
            .ok_or_else(|| Error::NotFound(format!("no facility with code \"{code}\"")))
    }

    /// Fetch the capacity report for all facilities.
    ///
    /// # Errors
    /// Returns an error when the capacity call fails.
    pub async fn capacity_list(&self, cancel: &CancellationToken) -> Result<CapacityReport, Error> {
        let response: CapacityReportResponse = self.get("/capacity", cancel).await?;
        Ok(response.capacity)
    }

    /// Check whether a set of (facility, plan, quantity) tuples can be
    /// satisfied. One call covers all tuples.
    ///
    /// # Errors
    /// Returns an error when the check call fails.
    pub async fn capacity_check(
        &self,
        input: &CapacityInput,
        cancel: &CancellationToken,
    ) -> Result<CapacityInput, Error> {
        self.post("/capacity", input, cancel).await
    }

    // ========================================================================
    // Projects
    // ========================================================================

    /// List all projects visible to the token.
    ///
    /// # Errors
    /// Returns an error when the list call fails.
    pub async fn list_projects(&self, cancel: &CancellationToken) -> Result<Vec<Project>, Error> {
        let list: ProjectsList = self.get("/projects", cancel).await?;
        Ok(list.projects)
    }

    /// Delete a project.
    ///
    /// # Errors
    /// Returns an error when the deletion call fails.
    pub async fn delete_project(&self, id: &str, cancel: &CancellationToken) -> Result<(), Error> {
        self.delete(&format!("/projects/{id}"), cancel).await
    }

    // ========================================================================
    // Volumes
    // ========================================================================

    /// List the volumes of a project.
    ///
    /// # Errors
    /// Returns an error when the list call fails.
    pub async fn list_volumes(
        &self,
        project_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Volume>, Error> {
        let list: VolumesList = self
            .get(&format!("/projects/{project_id}/storage"), cancel)
            .await?;
        Ok(list.volumes)
    }

    /// Get a volume by ID.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for an unknown ID.
    pub async fn get_volume(&self, id: &str, cancel: &CancellationToken) -> Result<Volume, Error> {
        self.get(&format!("/storage/{id}"), cancel).await
    }

    /// Look a volume up by name within a project.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] when no volume carries the name.
    pub async fn find_volume_by_name(
        &self,
        project_id: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Volume, Error> {
        let volumes = self.list_volumes(project_id, cancel).await?;
        volumes
            .into_iter()
            .find(|v| v.name == name)
            .ok_or_else(|| {
                Error::NotFound(format!("no volume named \"{name}\" in project {project_id}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = ApiClient::with_transport(
            Transport::new(RetryConfig::default()).unwrap(),
            "token",
        )
        .with_base_url("http://127.0.0.1:8080/")
        .unwrap();
        assert_eq!(client.url("/devices/d1"), "http://127.0.0.1:8080/devices/d1");
    }
}
