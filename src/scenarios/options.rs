//! Unique identifiers and terraform inputs for the bundled modules

use std::path::Path;

use rand::Rng;
use serde_json::json;

use crate::tools::terraform::TerraformOptions;

/// Length of a generated unique ID
pub const UNIQUE_ID_LEN: usize = 6;

const BASE62: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// A short random ID, unique enough to keep parallel runs apart
///
/// Resource names use the lower-cased form, Kubernetes names must be
/// lowercase.
pub fn unique_id() -> String {
    let mut rng = rand::thread_rng();
    (0..UNIQUE_ID_LEN)
        .map(|_| BASE62[rng.gen_range(0..BASE62.len())] as char)
        .collect()
}

/// Inputs for the namespace-with-service-account module
pub fn namespace_options(unique_id: &str, module_path: &Path) -> TerraformOptions {
    TerraformOptions::new(module_path).with_var("name", unique_id.to_lowercase())
}

/// Names derived from a unique ID for a Tiller deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TillerNames {
    pub tiller_namespace: String,
    pub resource_namespace: String,
    pub service_account_name: String,
}

impl TillerNames {
    pub fn new(unique_id: &str) -> Self {
        let id = unique_id.to_lowercase();
        Self {
            tiller_namespace: format!("{}-tiller", id),
            resource_namespace: format!("{}-resources", id),
            service_account_name: format!("{}-tiller-service-account", id),
        }
    }
}

/// Inputs for a Tiller module
pub fn tiller_options(
    module_path: &Path,
    helm_home: &Path,
    unique_id: &str,
    tiller_version: &str,
) -> TerraformOptions {
    let names = TillerNames::new(unique_id);
    TerraformOptions::new(module_path)
        .with_var("tiller_namespace", names.tiller_namespace)
        .with_var("resource_namespace", names.resource_namespace)
        .with_var("service_account_name", names.service_account_name)
        .with_var(
            "tls_subject",
            json!({ "common_name": "tiller", "org": "gruntwork" }),
        )
        .with_var("helm_home", helm_home.display().to_string())
        .with_var("tiller_version", tiller_version)
}

/// Inputs for the kubergrunt Tiller module, granting a test service account helm access
pub fn tiller_kubergrunt_options(
    module_path: &Path,
    helm_home: &Path,
    unique_id: &str,
    tiller_version: &str,
    test_service_account: &str,
    test_service_account_namespace: &str,
) -> TerraformOptions {
    let encoded = format!("{}/{}", test_service_account_namespace, test_service_account);
    tiller_options(module_path, helm_home, unique_id, tiller_version)
        .with_var("grant_access_to_rbac_service_accounts", json!([encoded]))
        .with_var("helm_client_rbac_service_account", encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unique_ids_are_base62() {
        let id = unique_id();
        assert_eq!(id.len(), UNIQUE_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(unique_id(), unique_id());
    }

    #[test]
    fn namespace_name_is_lowercased() {
        let opts = namespace_options("AbC12z", Path::new("/tmp/mod"));
        assert_eq!(opts.var_str("name").unwrap(), "abc12z");
        assert_eq!(opts.terraform_dir, Path::new("/tmp/mod"));
    }

    #[test]
    fn kubergrunt_options_encode_service_account() {
        let opts = tiller_kubergrunt_options(
            Path::new("/tmp/mod"),
            Path::new("/tmp/mod/.helm"),
            "XyZ789",
            "v2.11.0",
            "xyz789-test-account",
            "xyz789-test-account-namespace",
        );

        assert_eq!(opts.var_str("tiller_namespace").unwrap(), "xyz789-tiller");
        assert_eq!(opts.var_str("resource_namespace").unwrap(), "xyz789-resources");
        assert_eq!(
            opts.var_str("helm_client_rbac_service_account").unwrap(),
            "xyz789-test-account-namespace/xyz789-test-account"
        );
        assert!(opts.var_args().contains(
            &"grant_access_to_rbac_service_accounts=[\"xyz789-test-account-namespace/xyz789-test-account\"]"
                .to_string()
        ));
        assert!(opts
            .var_args()
            .contains(&"tls_subject={common_name = \"tiller\", org = \"gruntwork\"}".to_string()));
    }
}
