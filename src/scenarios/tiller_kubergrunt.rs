//! Tiller deployed by kubergrunt, exercised as a dedicated service account

use std::path::PathBuf;

use crate::common::Result;
use crate::stage::StageRunner;
use crate::tools::kubectl::{copy_home_kube_config_to_temp, KubectlOptions};
use crate::tools::Toolbox;

use super::options::{tiller_kubergrunt_options, unique_id};
use super::{
    keys, CLEANUP, CREATE_TERRAFORM_OPTIONS, CREATE_TEST_COPY, CREATE_TEST_SERVICE_ACCOUNT,
    TERRAFORM_APPLY, VALIDATE, VALIDATE_UPGRADE,
};

pub const MODULE_DIR: &str = "examples/k8s-tiller-kubergrunt-minikube";

pub async fn run(toolbox: &Toolbox, runner: &StageRunner) -> Result<()> {
    runner
        .run_stage(CREATE_TEST_COPY, || async {
            let module_path = super::copy_module(toolbox, runner, MODULE_DIR)?;
            super::create_helm_home(runner, &module_path).map(|_| ())
        })
        .await?;

    runner
        .run_stage(CREATE_TEST_SERVICE_ACCOUNT, || {
            create_test_service_account(toolbox, runner)
        })
        .await?;

    runner
        .run_stage(CREATE_TERRAFORM_OPTIONS, || async {
            let store = runner.store();
            let id = store.load_string(keys::UNIQUE_ID)?;
            let helm_home: PathBuf = store.load_value(keys::HELM_HOME)?;
            let module_path: PathBuf = store.load_value(keys::MODULE_PATH)?;
            let account = store.load_string(keys::TEST_SERVICE_ACCOUNT_NAME)?;
            let account_namespace = store.load_string(keys::TEST_SERVICE_ACCOUNT_NAMESPACE)?;

            let options = tiller_kubergrunt_options(
                &module_path,
                &helm_home,
                &id,
                &toolbox.config().helm.tiller_version,
                &account,
                &account_namespace,
            );
            store.save_terraform_options(&options)
        })
        .await?;

    runner
        .run_with_deferred(
            CLEANUP,
            || cleanup(toolbox, runner),
            || apply_and_validate(toolbox, runner),
        )
        .await
}

async fn apply_and_validate(toolbox: &Toolbox, runner: &StageRunner) -> Result<()> {
    runner
        .run_stage(TERRAFORM_APPLY, || super::terraform_apply(toolbox, runner))
        .await?;
    runner.run_stage(VALIDATE, || validate(toolbox, runner)).await?;
    runner
        .run_stage(VALIDATE_UPGRADE, || validate_upgrade(toolbox, runner))
        .await?;
    Ok(())
}

/// Create a service account in its own namespace and a kubeconfig context that logs in as it
///
/// The context lives in a private copy of the user's kubeconfig. If anything
/// after the namespace fails, the namespace is deleted before failing since
/// the deferred cleanup is not registered yet.
async fn create_test_service_account(toolbox: &Toolbox, runner: &StageRunner) -> Result<()> {
    let id = unique_id();
    let lower = id.to_lowercase();
    let account = format!("{}-test-account", lower);
    let account_namespace = format!("{}-test-account-namespace", lower);

    let kubeconfig = copy_home_kube_config_to_temp()?;
    let kubectl = toolbox.kubectl(KubectlOptions::new(None, Some(kubeconfig.clone()), None))?;

    kubectl.create_namespace(&account_namespace).await?;

    let namespaced = kubectl.in_namespace(&account_namespace);
    let login = async {
        namespaced.create_service_account(&account).await?;
        let timeouts = &toolbox.config().timeouts;
        let token = namespaced
            .get_service_account_auth_token(
                &account,
                timeouts.token_secret_retries,
                timeouts.token_secret_sleep(),
            )
            .await?;
        namespaced
            .add_config_context_for_service_account(&account, &account, &token)
            .await
    };

    if let Err(e) = login.await {
        if let Err(delete_err) = kubectl.delete_namespace(&account_namespace).await {
            tracing::warn!(
                namespace = %account_namespace,
                error = %delete_err,
                "Failed to delete test service account namespace"
            );
        }
        return Err(e);
    }

    let store = runner.store();
    store.save_string(keys::UNIQUE_ID, &id)?;
    store.save_value(keys::TMP_KUBECONFIG, &kubeconfig)?;
    store.save_string(keys::TEST_SERVICE_ACCOUNT_NAME, &account)?;
    store.save_string(keys::TEST_SERVICE_ACCOUNT_NAMESPACE, &account_namespace)
}

/// Install a chart as the test service account
async fn validate(toolbox: &Toolbox, runner: &StageRunner) -> Result<()> {
    let store = runner.store();
    let helm_home: PathBuf = store.load_value(keys::HELM_HOME)?;
    let kubeconfig: PathBuf = store.load_value(keys::TMP_KUBECONFIG)?;
    let account = store.load_string(keys::TEST_SERVICE_ACCOUNT_NAME)?;
    let options = store.load_terraform_options()?;
    let resource_namespace = options.var_str("resource_namespace")?;

    let kubectl_options = KubectlOptions::new(
        Some(account),
        Some(kubeconfig),
        Some(resource_namespace.to_string()),
    );
    toolbox
        .helm(helm_home)?
        .run(
            &kubectl_options,
            &["install", toolbox.config().helm.chart.as_str(), "--wait"],
        )
        .await
}

/// Run the documented helm upgrade command against the deployed Tiller
async fn validate_upgrade(toolbox: &Toolbox, runner: &StageRunner) -> Result<()> {
    let store = runner.store();
    let helm_home: PathBuf = store.load_value(keys::HELM_HOME)?;
    let kubeconfig: PathBuf = store.load_value(keys::TMP_KUBECONFIG)?;

    let kubectl_options = KubectlOptions::new(None, Some(kubeconfig), None);
    toolbox
        .helm(helm_home)?
        .run(&kubectl_options, &["init", "--upgrade", "--wait"])
        .await
}

/// Destroy the deployment, then the test service account's namespace
///
/// The namespace is deleted even if destroy fails; the first error wins.
async fn cleanup(toolbox: &Toolbox, runner: &StageRunner) -> Result<()> {
    let destroyed = super::terraform_destroy(toolbox, runner).await;

    let account_namespace = runner
        .store()
        .load_string(keys::TEST_SERVICE_ACCOUNT_NAMESPACE)?;
    let deleted = toolbox
        .kubectl(KubectlOptions::default())?
        .delete_namespace(&account_namespace)
        .await;

    destroyed.and(deleted)
}
