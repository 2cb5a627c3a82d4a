//! RBAC verification through a proxy pod
//!
//! A pod running as the service account under test carries two containers:
//! `main`, which has curl, and `proxy`, which runs `kubectl proxy` with the
//! pod's credentials. Requests from `main` to `localhost:8001` are therefore
//! authorized as the service account, so a `SelfSubjectAccessReview` posted
//! there answers "can this account do X".

use std::future::Future;

use serde::Deserialize;

use crate::common::config::Timeouts;
use crate::common::{Error, Result};
use crate::stage::Assertions;
use crate::template::{render_manifest, render_template_as_string, TemplateArgs};
use crate::tools::kubectl::Kubectl;
use crate::tools::Toolbox;

pub const CURL_POD_MANIFEST: &str = "curl-kubeapi-as-service-account.yml.tpl";
pub const CHECK_CREATE_POD: &str = "namespace-check-create-pod.json.tpl";
pub const CHECK_LIST_POD: &str = "namespace-check-list-pod.json.tpl";

/// Container in the proxy pod that has curl
pub const CURL_CONTAINER: &str = "main";

const ACCESS_REVIEW_URL: &str =
    "localhost:8001/apis/authorization.k8s.io/v1/selfsubjectaccessreviews";

/// Name of the proxy pod for a service account
pub fn curl_pod_name(service_account: &str) -> String {
    format!("{}-curl", service_account)
}

#[derive(Debug, Deserialize)]
struct SelfSubjectAccessReview {
    #[serde(default)]
    status: ReviewStatus,
}

#[derive(Debug, Default, Deserialize)]
struct ReviewStatus {
    #[serde(default)]
    allowed: bool,
}

/// Parse the `status.allowed` flag of an access review response
pub fn parse_access_review(raw: &str) -> Result<bool> {
    let review: SelfSubjectAccessReview = serde_json::from_str(raw)
        .map_err(|e| Error::unexpected_output("selfsubjectaccessreviews", e.to_string()))?;
    Ok(review.status.allowed)
}

/// Ask the API, as the pod's service account, whether the action in `body` is allowed
///
/// `kubectl` must target the namespace the pod lives in.
pub async fn can_access(kubectl: &Kubectl, pod: &str, body: &str) -> Result<bool> {
    let raw = kubectl
        .exec(
            pod,
            CURL_CONTAINER,
            &[
                "curl",
                "-s",
                "-X",
                "POST",
                "-H",
                "Content-type: application/json",
                "-d",
                body,
                ACCESS_REVIEW_URL,
            ],
        )
        .await?;
    parse_access_review(&raw)
}

/// Launch the proxy pod for `service_account`, run `check` against it, then delete it
///
/// `check` receives a kubectl bound to `namespace` and the pod name. The pod
/// manifest is deleted whether or not the check succeeds.
pub async fn check_access_for_service_account<F, Fut>(
    toolbox: &Toolbox,
    kubectl: &Kubectl,
    namespace: &str,
    service_account: &str,
    check: F,
) -> Result<()>
where
    F: FnOnce(Kubectl, String) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let args = TemplateArgs::new(namespace, service_account);
    let manifest = render_manifest(&toolbox.fixture(CURL_POD_MANIFEST), &args)?;

    kubectl.apply_from_string(&manifest).await?;
    let timeouts = &toolbox.config().timeouts;
    let result = run_against_pod(timeouts, kubectl, namespace, service_account, check).await;

    if let Err(e) = kubectl.delete_from_string(&manifest).await {
        tracing::warn!(service_account, error = %e, "Failed to delete proxy pod");
        if result.is_ok() {
            return Err(e);
        }
    }

    result
}

async fn run_against_pod<F, Fut>(
    timeouts: &Timeouts,
    kubectl: &Kubectl,
    namespace: &str,
    service_account: &str,
    check: F,
) -> Result<()>
where
    F: FnOnce(Kubectl, String) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    // Looking a pod up by name needs an explicit namespace
    let namespaced = kubectl.in_namespace(namespace);
    let pod = curl_pod_name(service_account);

    namespaced
        .wait_until_pod_available(
            &pod,
            timeouts.pod_available_retries,
            timeouts.pod_available_sleep(),
        )
        .await?;

    check(namespaced, pod).await
}

/// What a service account may do with pods in its own namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessExpectation {
    pub create: bool,
    pub list: bool,
}

impl AccessExpectation {
    pub const READ_WRITE: Self = Self {
        create: true,
        list: true,
    };

    pub const READ_ONLY: Self = Self {
        create: false,
        list: true,
    };
}

/// Rendered access review bodies for one namespace and for `default`
#[derive(Debug, Clone)]
pub struct AccessRequests {
    pub create_pod: String,
    pub list_pod: String,
    pub default_create_pod: String,
    pub default_list_pod: String,
}

impl AccessRequests {
    pub fn render(toolbox: &Toolbox, args: &TemplateArgs) -> Result<Self> {
        let default_args = TemplateArgs::namespace_only("default");
        let create = toolbox.fixture(CHECK_CREATE_POD);
        let list = toolbox.fixture(CHECK_LIST_POD);

        Ok(Self {
            create_pod: render_template_as_string(&create, args)?,
            list_pod: render_template_as_string(&list, args)?,
            default_create_pod: render_template_as_string(&create, &default_args)?,
            default_list_pod: render_template_as_string(&list, &default_args)?,
        })
    }
}

/// Verify a service account's pod permissions in `namespace` and in `default`
///
/// All four reviews are made before reporting, so one run shows every
/// mismatch.
pub async fn verify_service_account_access(
    toolbox: &Toolbox,
    kubectl: &Kubectl,
    namespace: &str,
    service_account: &str,
    expected: AccessExpectation,
) -> Result<()> {
    let args = TemplateArgs::new(namespace, service_account);
    let requests = AccessRequests::render(toolbox, &args)?;

    let check = |kubectl: Kubectl, pod: String| async move {
        let mut assertions = Assertions::new();
        assertions
            .equal(
                "create pods in own namespace",
                expected.create,
                can_access(&kubectl, &pod, &requests.create_pod).await?,
            )
            .equal(
                "list pods in own namespace",
                expected.list,
                can_access(&kubectl, &pod, &requests.list_pod).await?,
            )
            .is_false(
                "create pods in default namespace",
                can_access(&kubectl, &pod, &requests.default_create_pod).await?,
            )
            .is_false(
                "list pods in default namespace",
                can_access(&kubectl, &pod, &requests.default_list_pod).await?,
            );
        assertions.finish()
    };

    check_access_for_service_account(toolbox, kubectl, namespace, service_account, check).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_flag_is_read_from_status() {
        let raw = r#"{"kind":"SelfSubjectAccessReview","apiVersion":"authorization.k8s.io/v1",
            "spec":{"resourceAttributes":{"namespace":"abc","verb":"list","resource":"pods"}},
            "status":{"allowed":true,"reason":"RBAC: allowed by RoleBinding"}}"#;
        assert!(parse_access_review(raw).unwrap());
    }

    #[test]
    fn missing_allowed_means_denied() {
        assert!(!parse_access_review(r#"{"status":{}}"#).unwrap());
        assert!(!parse_access_review(r#"{"kind":"SelfSubjectAccessReview"}"#).unwrap());
    }

    #[test]
    fn non_json_response_is_an_error() {
        let err = parse_access_review("curl: (7) Failed to connect").unwrap_err();
        assert!(matches!(err, Error::UnexpectedOutput { .. }));
    }

    #[test]
    fn pod_name_follows_service_account() {
        assert_eq!(curl_pod_name("abc123-access-all"), "abc123-access-all-curl");
    }

    #[test]
    fn bundled_requests_render() {
        let mut config = crate::common::config::Config::default();
        config.paths.fixtures_dir =
            std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("kubefixtures");
        let toolbox = Toolbox::new(config);

        let args = TemplateArgs::new("abc123", "abc123-access-all");
        let requests = AccessRequests::render(&toolbox, &args).unwrap();
        let create: serde_json::Value = serde_json::from_str(&requests.create_pod).unwrap();
        assert_eq!(create["spec"]["resourceAttributes"]["namespace"], "abc123");
        assert_eq!(create["spec"]["resourceAttributes"]["verb"], "create");

        let list: serde_json::Value = serde_json::from_str(&requests.default_list_pod).unwrap();
        assert_eq!(list["spec"]["resourceAttributes"]["namespace"], "default");
        assert_eq!(list["spec"]["resourceAttributes"]["verb"], "list");
    }

    #[test]
    fn bundled_pod_manifest_renders() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("kubefixtures")
            .join(CURL_POD_MANIFEST);
        let manifest =
            render_manifest(&path, &TemplateArgs::new("abc123", "abc123-read-only")).unwrap();
        let pod: serde_yaml::Value = serde_yaml::from_str(&manifest).unwrap();
        assert_eq!(pod["metadata"]["name"].as_str(), Some("abc123-read-only-curl"));
        assert_eq!(pod["spec"]["serviceAccountName"].as_str(), Some("abc123-read-only"));
    }
}
