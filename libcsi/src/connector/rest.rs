//! REST [`Connector`] for the filesystem management endpoint.
//!
//! Every request goes to `https://<guiHost>:<guiPort>/scalemgmt/v2/...` with
//! basic authentication.  Mutating calls answer with an asynchronous job
//! which is polled through `jobs/<id>` until it leaves the `RUNNING` state.
//!
//! Error mapping:
//!
//! * HTTP 401 becomes [`ConnectorError::Unauthenticated`].
//! * HTTP 404, or a job failing with "not found" / "does not exist", becomes
//!   [`ConnectorError::NotFound`].  Delete and unlink calls swallow it.
//! * A job failing with "already exists" becomes
//!   [`ConnectorError::AlreadyExists`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use super::{
    Connector, ConnectorError, ConnectorFactory, FilesetInfo, FilesetOptions, FilesetType,
    HasClusterId, MountInfo,
};
use crate::config::{ClusterConfig, DriverConfig};

const API_ROOT: &str = "scalemgmt/v2";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const JOB_POLL_INTERVAL: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct JobsResponse {
    #[serde(default)]
    jobs: Vec<Job>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    job_id: u64,
    status: String,
    #[serde(default)]
    result: Option<JobResult>,
}

#[derive(Debug, Default, Deserialize)]
struct JobResult {
    #[serde(default)]
    stderr: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ClusterResponse {
    cluster: ClusterBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterBody {
    cluster_summary: ClusterSummary,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterSummary {
    cluster_id: u64,
}

#[derive(Debug, Deserialize)]
struct FilesystemsResponse {
    #[serde(default)]
    filesystems: Vec<Filesystem>,
}

#[derive(Debug, Deserialize)]
struct Filesystem {
    name: String,
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    mount: Option<FilesystemMount>,
    #[serde(default)]
    quota: Option<FilesystemQuota>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilesystemMount {
    #[serde(default)]
    mount_point: String,
    #[serde(default)]
    remote_device_name: Option<String>,
    #[serde(default)]
    nodes_mounted: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilesystemQuota {
    #[serde(default)]
    quotas_enforced: String,
}

#[derive(Debug, Deserialize)]
struct FilesetsResponse {
    #[serde(default)]
    filesets: Vec<Fileset>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Fileset {
    fileset_name: String,
    config: FilesetConfig,
}

#[derive(Debug, Deserialize)]
struct FilesetConfig {
    id: u64,
    #[serde(default)]
    path: Option<String>,
}

impl Fileset {
    fn into_info(self) -> FilesetInfo {
        // Unlinked filesets report "--" as their path.
        let link_path = self
            .config
            .path
            .filter(|p| !p.is_empty() && p != "--");
        FilesetInfo {
            name: self.fileset_name,
            id: self.config.id,
            link_path,
        }
    }
}

#[derive(Debug, Deserialize)]
struct QuotasResponse {
    #[serde(default)]
    quotas: Vec<Quota>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Quota {
    /// Hard block limit in KiB.
    #[serde(default)]
    block_limit: u64,
}

impl QuotasResponse {
    /// First non-zero hard limit, in bytes.
    fn limit_bytes(self) -> Option<u64> {
        self.quotas
            .into_iter()
            .find(|q| q.block_limit > 0)
            .map(|q| q.block_limit.saturating_mul(1024))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Classify the stderr of a failed job.
fn job_failure(job_id: u64, stderr: &[String]) -> ConnectorError {
    let message = stderr.join(" ").trim().to_owned();
    let lower = message.to_lowercase();
    if lower.contains("already exists") {
        ConnectorError::AlreadyExists(message)
    } else if lower.contains("not found")
        || lower.contains("does not exist")
        || lower.contains("no such file")
    {
        ConnectorError::NotFound(message)
    } else {
        ConnectorError::JobFailed { job_id, message }
    }
}

/// Owner string `uid:gid` for fileset creation.
fn owner(uid: Option<&str>, gid: Option<&str>) -> Option<String> {
    match (uid, gid) {
        (Some(uid), Some(gid)) => Some(format!("{uid}:{gid}")),
        (Some(uid), None) => Some(uid.to_owned()),
        (None, Some(gid)) => Some(format!(":{gid}")),
        (None, None) => None,
    }
}

fn fileset_body(name: &str, options: &FilesetOptions) -> Value {
    let mut body = json!({ "filesetName": name });
    let inode_space = match options.fileset_type {
        FilesetType::Independent => "new".to_owned(),
        FilesetType::Dependent => options
            .parent_fileset
            .clone()
            .unwrap_or_else(|| "root".to_owned()),
    };
    body["inodeSpace"] = json!(inode_space);
    if let Some(limit) = options.inode_limit {
        body["maxNumInodes"] = json!(limit);
        body["allocInodes"] = json!(limit);
    }
    if let Some(owner) = owner(options.uid.as_deref(), options.gid.as_deref()) {
        body["owner"] = json!(owner);
    }
    if let Some(path) = options.link_path.as_deref() {
        body["path"] = json!(path);
    }
    body
}

/// Treat "not found" as success for idempotent deletes.
fn ignore_not_found(result: Result<(), ConnectorError>) -> Result<(), ConnectorError> {
    match result {
        Err(e) if e.is_not_found() => {
            debug!(error = %e, "target already gone");
            Ok(())
        }
        other => other,
    }
}

// ---------------------------------------------------------------------------
// RestConnector
// ---------------------------------------------------------------------------

/// Connector talking to one cluster's management endpoint.
pub struct RestConnector {
    client: Client,
    base: Url,
    username: String,
    password: String,
    poll_interval: Duration,
}

impl RestConnector {
    /// Build a connector for `cluster`, using its first REST endpoint.
    pub fn new(cluster: &ClusterConfig) -> Result<Self, ConnectorError> {
        let endpoint = cluster.rest_api.first().ok_or_else(|| {
            ConnectorError::Protocol(format!("cluster {} has no REST endpoint", cluster.id))
        })?;
        let base = Url::parse(&format!(
            "https://{}:{}/{API_ROOT}/",
            endpoint.gui_host, endpoint.gui_port
        ))
        .map_err(|e| ConnectorError::Protocol(format!("invalid endpoint: {e}")))?;

        let mut builder = Client::builder().timeout(REQUEST_TIMEOUT);
        if cluster.secure_ssl_mode {
            let path = cluster.cacert.as_ref().ok_or_else(|| {
                ConnectorError::Protocol(format!("cluster {} has no cacert", cluster.id))
            })?;
            let pem = std::fs::read(path).map_err(|e| {
                ConnectorError::Protocol(format!("read cacert {}: {e}", path.display()))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| ConnectorError::Protocol(format!("invalid cacert: {e}")))?;
            builder = builder.add_root_certificate(cert);
        } else {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|e| ConnectorError::Protocol(format!("build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base,
            username: cluster.username.clone(),
            password: cluster.password.clone(),
            poll_interval: JOB_POLL_INTERVAL,
        })
    }

    /// Override the job polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Build an API URL.  Each segment is percent-encoded as a whole, so
    /// relative paths like `a/b` travel as `a%2Fb`.
    fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url, ConnectorError> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| ConnectorError::Protocol(format!("{} cannot be a base", self.base)))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<reqwest::Response, ConnectorError> {
        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .basic_auth(&self.username, Some(&self.password));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| ConnectorError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        debug!(%method, %url, %status, body = %text, "request rejected");
        match status {
            StatusCode::UNAUTHORIZED => Err(ConnectorError::Unauthenticated(
                self.base.host_str().unwrap_or_default().to_owned(),
            )),
            StatusCode::NOT_FOUND => Err(ConnectorError::NotFound(url.path().to_owned())),
            _ if text.to_lowercase().contains("does not exist") => {
                Err(ConnectorError::NotFound(text))
            }
            _ => Err(ConnectorError::Request {
                url: url.to_string(),
                reason: format!("HTTP {status}: {text}"),
            }),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ConnectorError> {
        self.send(Method::GET, url, None)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ConnectorError::Protocol(e.to_string()))
    }

    /// Issue a mutating request and wait for the jobs it spawned.
    async fn submit(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<(), ConnectorError> {
        let response: JobsResponse = self
            .send(method, url, body)
            .await?
            .json()
            .await
            .map_err(|e| ConnectorError::Protocol(e.to_string()))?;
        for job in response.jobs {
            self.wait_for_job(job).await?;
        }
        Ok(())
    }

    async fn wait_for_job(&self, mut job: Job) -> Result<(), ConnectorError> {
        loop {
            match job.status.as_str() {
                "COMPLETED" => return Ok(()),
                "FAILED" => {
                    let stderr = job.result.unwrap_or_default().stderr;
                    return Err(job_failure(job.job_id, &stderr));
                }
                _ => {}
            }
            tokio::time::sleep(self.poll_interval).await;

            let job_id = job.job_id.to_string();
            let url = self.url(&["jobs", &job_id], &[])?;
            let mut polled: JobsResponse = self.get_json(url).await?;
            job = polled.jobs.pop().ok_or_else(|| {
                ConnectorError::Protocol(format!("job {job_id} missing from status response"))
            })?;
        }
    }

    async fn filesystem(&self, filesystem: &str, fields: &str) -> Result<Filesystem, ConnectorError> {
        let url = self.url(&["filesystems", filesystem], &[("fields", fields)])?;
        let response: FilesystemsResponse = self.get_json(url).await?;
        response
            .filesystems
            .into_iter()
            .next()
            .ok_or_else(|| ConnectorError::NotFound(format!("filesystem {filesystem}")))
    }
}

#[async_trait]
impl Connector for RestConnector {
    async fn get_cluster_id(&self) -> Result<String, ConnectorError> {
        let response: ClusterResponse = self.get_json(self.url(&["cluster"], &[])?).await?;
        Ok(response.cluster.cluster_summary.cluster_id.to_string())
    }

    async fn list_filesystems(&self) -> Result<Vec<String>, ConnectorError> {
        let response: FilesystemsResponse =
            self.get_json(self.url(&["filesystems"], &[])?).await?;
        Ok(response.filesystems.into_iter().map(|fs| fs.name).collect())
    }

    async fn get_filesystem_name(&self, uuid: &str) -> Result<String, ConnectorError> {
        let filter = format!("uuid={uuid}");
        let url = self.url(&["filesystems"], &[("filter", &filter), ("fields", "uuid")])?;
        let response: FilesystemsResponse = self.get_json(url).await?;
        response
            .filesystems
            .into_iter()
            .find(|fs| fs.uuid == uuid)
            .map(|fs| fs.name)
            .ok_or_else(|| ConnectorError::NotFound(format!("filesystem with uuid {uuid}")))
    }

    async fn get_filesystem_uid(&self, filesystem: &str) -> Result<String, ConnectorError> {
        Ok(self.filesystem(filesystem, "uuid").await?.uuid)
    }

    async fn get_filesystem_mount_point(
        &self,
        filesystem: &str,
    ) -> Result<String, ConnectorError> {
        Ok(self
            .get_filesystem_mount_details(filesystem)
            .await?
            .mount_point)
    }

    async fn get_filesystem_mount_details(
        &self,
        filesystem: &str,
    ) -> Result<MountInfo, ConnectorError> {
        let mount = self
            .filesystem(filesystem, "mount")
            .await?
            .mount
            .unwrap_or_default();
        Ok(MountInfo {
            mount_point: mount.mount_point,
            nodes_mounted: mount.nodes_mounted,
            remote_device_name: mount.remote_device_name.filter(|d| !d.is_empty()),
        })
    }

    async fn is_filesystem_mounted(
        &self,
        filesystem: &str,
        node: &str,
    ) -> Result<bool, ConnectorError> {
        let details = self.get_filesystem_mount_details(filesystem).await?;
        Ok(details.nodes_mounted.iter().any(|n| n == node))
    }

    #[instrument(skip(self))]
    async fn mount_filesystem(&self, filesystem: &str, node: &str) -> Result<(), ConnectorError> {
        let url = self.url(&["filesystems", filesystem, "mount"], &[])?;
        self.submit(Method::PUT, url, Some(&json!({ "nodes": [node] })))
            .await
    }

    #[instrument(skip(self))]
    async fn unmount_filesystem(
        &self,
        filesystem: &str,
        node: &str,
    ) -> Result<(), ConnectorError> {
        let url = self.url(&["filesystems", filesystem, "unmount"], &[])?;
        self.submit(Method::PUT, url, Some(&json!({ "nodes": [node] })))
            .await
    }

    async fn check_quota_enabled(&self, filesystem: &str) -> Result<bool, ConnectorError> {
        let quota = self
            .filesystem(filesystem, "quota")
            .await?
            .quota
            .unwrap_or_default();
        Ok(quota.quotas_enforced.contains("fileset"))
    }

    #[instrument(skip(self, options))]
    async fn create_fileset(
        &self,
        filesystem: &str,
        name: &str,
        options: &FilesetOptions,
    ) -> Result<(), ConnectorError> {
        let url = self.url(&["filesystems", filesystem, "filesets"], &[])?;
        self.submit(Method::POST, url, Some(&fileset_body(name, options)))
            .await
    }

    #[instrument(skip(self))]
    async fn delete_fileset(&self, filesystem: &str, name: &str) -> Result<(), ConnectorError> {
        // A linked fileset cannot be deleted.
        match self.unlink_fileset(filesystem, name).await {
            Ok(()) => {}
            Err(e) => warn!(error = %e, "unlink before delete failed, deleting anyway"),
        }
        let url = self.url(&["filesystems", filesystem, "filesets", name], &[])?;
        ignore_not_found(self.submit(Method::DELETE, url, None).await)
    }

    #[instrument(skip(self))]
    async fn link_fileset(
        &self,
        filesystem: &str,
        name: &str,
        link_path: &str,
    ) -> Result<(), ConnectorError> {
        let url = self.url(&["filesystems", filesystem, "filesets", name, "link"], &[])?;
        self.submit(Method::POST, url, Some(&json!({ "path": link_path })))
            .await
    }

    #[instrument(skip(self))]
    async fn unlink_fileset(&self, filesystem: &str, name: &str) -> Result<(), ConnectorError> {
        let url = self.url(
            &["filesystems", filesystem, "filesets", name, "link"],
            &[("force", "True")],
        )?;
        ignore_not_found(self.submit(Method::DELETE, url, None).await)
    }

    async fn get_fileset(
        &self,
        filesystem: &str,
        name: &str,
    ) -> Result<FilesetInfo, ConnectorError> {
        let url = self.url(&["filesystems", filesystem, "filesets", name], &[])?;
        let response: FilesetsResponse = self.get_json(url).await?;
        response
            .filesets
            .into_iter()
            .next()
            .map(Fileset::into_info)
            .ok_or_else(|| ConnectorError::NotFound(format!("fileset {name}")))
    }

    async fn get_fileset_uid(
        &self,
        filesystem: &str,
        name: &str,
    ) -> Result<String, ConnectorError> {
        Ok(self.get_fileset(filesystem, name).await?.id.to_string())
    }

    async fn get_fileset_name_from_id(
        &self,
        filesystem: &str,
        id: &str,
    ) -> Result<String, ConnectorError> {
        let filter = format!("config.id={id}");
        let url = self.url(&["filesystems", filesystem, "filesets"], &[("filter", &filter)])?;
        let response: FilesetsResponse = self.get_json(url).await?;
        response
            .filesets
            .into_iter()
            .find(|f| f.config.id.to_string() == id)
            .map(|f| f.fileset_name)
            .ok_or_else(|| ConnectorError::NotFound(format!("fileset with id {id}")))
    }

    async fn is_fileset_linked(
        &self,
        filesystem: &str,
        name: &str,
    ) -> Result<bool, ConnectorError> {
        Ok(self
            .get_fileset(filesystem, name)
            .await?
            .link_path
            .is_some())
    }

    async fn list_fileset_quota(
        &self,
        filesystem: &str,
        name: &str,
    ) -> Result<Option<u64>, ConnectorError> {
        let filter = format!("objectName={name},quotaType=FILESET");
        let url = self.url(&["filesystems", filesystem, "quotas"], &[("filter", &filter)])?;
        let response: QuotasResponse = self.get_json(url).await?;
        Ok(response.limit_bytes())
    }

    #[instrument(skip(self))]
    async fn set_fileset_quota(
        &self,
        filesystem: &str,
        name: &str,
        bytes: u64,
    ) -> Result<(), ConnectorError> {
        let limit = format!("{}K", bytes.div_ceil(1024));
        let url = self.url(&["filesystems", filesystem, "quotas"], &[])?;
        let body = json!({
            "operationType": "setQuota",
            "quotaType": "FILESET",
            "objectName": name,
            "blockSoftLimit": limit,
            "blockHardLimit": limit,
        });
        self.submit(Method::POST, url, Some(&body)).await
    }

    #[instrument(skip(self))]
    async fn make_directory(
        &self,
        filesystem: &str,
        rel_path: &str,
        uid: &str,
        gid: &str,
    ) -> Result<(), ConnectorError> {
        let url = self.url(
            &["filesystems", filesystem, "directory", rel_path.trim_matches('/')],
            &[],
        )?;
        let body = json!({ "user": uid, "group": gid });
        self.submit(Method::POST, url, Some(&body)).await
    }

    #[instrument(skip(self))]
    async fn delete_directory(
        &self,
        filesystem: &str,
        rel_path: &str,
    ) -> Result<(), ConnectorError> {
        let url = self.url(
            &["filesystems", filesystem, "directory", rel_path.trim_matches('/')],
            &[],
        )?;
        ignore_not_found(self.submit(Method::DELETE, url, None).await)
    }

    async fn path_exists(&self, filesystem: &str, rel_path: &str) -> Result<bool, ConnectorError> {
        let url = self.url(
            &["filesystems", filesystem, "owner", rel_path.trim_matches('/')],
            &[],
        )?;
        match self.send(Method::GET, url, None).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn create_symlink(
        &self,
        link_filesystem: &str,
        target_filesystem: &str,
        target_rel_path: &str,
        link_rel_path: &str,
    ) -> Result<(), ConnectorError> {
        let url = self.url(
            &["filesystems", link_filesystem, "symlink", link_rel_path.trim_matches('/')],
            &[],
        )?;
        let body = json!({
            "filesystemName": target_filesystem,
            "relativePath": target_rel_path.trim_matches('/'),
        });
        self.submit(Method::POST, url, Some(&body)).await
    }

    #[instrument(skip(self))]
    async fn delete_symlink(
        &self,
        filesystem: &str,
        link_rel_path: &str,
    ) -> Result<(), ConnectorError> {
        let url = self.url(
            &["filesystems", filesystem, "symlink", link_rel_path.trim_matches('/')],
            &[],
        )?;
        ignore_not_found(self.submit(Method::DELETE, url, None).await)
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Builds [`RestConnector`]s for the clusters of a [`DriverConfig`].
pub struct RestConnectorFactory {
    clusters: HashMap<String, ClusterConfig>,
}

impl RestConnectorFactory {
    pub fn new(config: &DriverConfig) -> Self {
        Self {
            clusters: config
                .clusters
                .iter()
                .map(|c| (c.id.clone(), c.clone()))
                .collect(),
        }
    }
}

impl ConnectorFactory for RestConnectorFactory {
    fn new_connector(
        &self,
        cluster: &dyn HasClusterId,
    ) -> Result<std::sync::Arc<dyn Connector>, ConnectorError> {
        let config = self.clusters.get(cluster.cluster_id()).ok_or_else(|| {
            ConnectorError::NotFound(format!("cluster {} in configuration", cluster.cluster_id()))
        })?;
        Ok(std::sync::Arc::new(RestConnector::new(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RestEndpoint;

    fn cluster() -> ClusterConfig {
        ClusterConfig {
            id: "c1".into(),
            primary: None,
            rest_api: vec![RestEndpoint {
                gui_host: "gui.example".into(),
                gui_port: 8443,
            }],
            username: "admin".into(),
            password: "secret".into(),
            secure_ssl_mode: false,
            cacert: None,
        }
    }

    #[test]
    fn urls_encode_paths_as_one_segment() {
        let conn = RestConnector::new(&cluster()).unwrap();
        let url = conn
            .url(&["filesystems", "fs1", "directory", "csi/.volumes/pvc1"], &[])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://gui.example:8443/scalemgmt/v2/filesystems/fs1/directory/csi%2F.volumes%2Fpvc1"
        );

        let url = conn
            .url(&["filesystems"], &[("filter", "uuid=0A:0B")])
            .unwrap();
        assert_eq!(url.query(), Some("filter=uuid%3D0A%3A0B"));
    }

    #[test]
    fn job_failures_are_classified() {
        let err = job_failure(7, &["EFSSG0102C Fileset pvc1 already exists.".into()]);
        assert!(err.is_already_exists());

        let err = job_failure(7, &["Directory volumes/pvc2 does not exist".into()]);
        assert!(err.is_not_found());

        let err = job_failure(7, &["disk quota exceeded".into()]);
        assert_eq!(
            err,
            ConnectorError::JobFailed {
                job_id: 7,
                message: "disk quota exceeded".into()
            }
        );
    }

    #[test]
    fn fileset_body_selects_inode_space() {
        let independent = FilesetOptions {
            fileset_type: FilesetType::Independent,
            inode_limit: Some(100_000),
            parent_fileset: None,
            uid: Some("1000".into()),
            gid: Some("100".into()),
            link_path: None,
        };
        let body = fileset_body("pvc1", &independent);
        assert_eq!(body["inodeSpace"], "new");
        assert_eq!(body["maxNumInodes"], 100_000);
        assert_eq!(body["owner"], "1000:100");
        assert!(body.get("path").is_none());

        let dependent = FilesetOptions {
            fileset_type: FilesetType::Dependent,
            inode_limit: None,
            parent_fileset: Some("parent1".into()),
            uid: None,
            gid: None,
            link_path: Some("/gpfs/fs1/parent1/pvc2".into()),
        };
        let body = fileset_body("pvc2", &dependent);
        assert_eq!(body["inodeSpace"], "parent1");
        assert_eq!(body["path"], "/gpfs/fs1/parent1/pvc2");
        assert!(body.get("owner").is_none());
    }

    #[test]
    fn wire_types_parse() {
        let fsets: FilesetsResponse = serde_json::from_str(
            r#"{"filesets":[{"filesetName":"pvc1","config":{"id":12,"path":"--"}}]}"#,
        )
        .unwrap();
        let info = fsets.filesets.into_iter().next().unwrap().into_info();
        assert_eq!(info.id, 12);
        assert_eq!(info.link_path, None);

        let fs: FilesystemsResponse = serde_json::from_str(
            r#"{"filesystems":[{"name":"fs1","mount":{"mountPoint":"/gpfs/fs1",
                "remoteDeviceName":"owner:fs9","nodesMounted":["n1","n2"]}}]}"#,
        )
        .unwrap();
        let mount = fs.filesystems[0].mount.as_ref().unwrap();
        assert_eq!(mount.nodes_mounted.len(), 2);
        assert_eq!(mount.remote_device_name.as_deref(), Some("owner:fs9"));

        let jobs: JobsResponse = serde_json::from_str(
            r#"{"jobs":[{"jobId":42,"status":"FAILED","result":{"stderr":["boom"]}}]}"#,
        )
        .unwrap();
        assert_eq!(jobs.jobs[0].job_id, 42);
    }

    #[test]
    fn quota_limits_are_kib() {
        let quotas: QuotasResponse = serde_json::from_str(
            r#"{"quotas":[{"blockLimit":0},{"blockLimit":1048576}]}"#,
        )
        .unwrap();
        assert_eq!(quotas.limit_bytes(), Some(1 << 30));

        let quotas: QuotasResponse =
            serde_json::from_str(&format!(r#"{{"quotas":[{{"blockLimit":{}}}]}}"#, u64::MAX)).unwrap();
        assert_eq!(quotas.limit_bytes(), Some(u64::MAX));

        let quotas: QuotasResponse = serde_json::from_str(r#"{"quotas":[]}"#).unwrap();
        assert_eq!(quotas.limit_bytes(), None);
    }

    #[tokio::test]
    async fn terminal_jobs_do_not_poll() {
        let conn = RestConnector::new(&cluster())
            .unwrap()
            .with_poll_interval(Duration::from_millis(1));
        let done = Job {
            job_id: 1,
            status: "COMPLETED".into(),
            result: None,
        };
        conn.wait_for_job(done).await.unwrap();

        let failed = Job {
            job_id: 2,
            status: "FAILED".into(),
            result: Some(JobResult {
                stderr: vec!["Fileset pvc1 already exists".into()],
            }),
        };
        assert!(conn.wait_for_job(failed).await.unwrap_err().is_already_exists());
    }

    #[test]
    fn owner_strings() {
        assert_eq!(owner(Some("1"), Some("2")).as_deref(), Some("1:2"));
        assert_eq!(owner(None, Some("2")).as_deref(), Some(":2"));
        assert_eq!(owner(None, None), None);
    }
}
