//! Tiller scenarios for the root module

use std::path::PathBuf;

use crate::common::Result;
use crate::stage::StageRunner;
use crate::tools::kubectl::KubectlOptions;
use crate::tools::Toolbox;

use super::options::{tiller_options, unique_id};
use super::{
    keys, CLEANUP, CREATE_TERRAFORM_OPTIONS, CREATE_TEST_COPY, SETUP_HELM_CLIENT, TERRAFORM_APPLY,
    VALIDATE,
};

/// The root module deploys Tiller
pub const MODULE_DIR: &str = ".";

/// Deploy Tiller, configure a helm client for it and install a chart
pub async fn run(toolbox: &Toolbox, runner: &StageRunner) -> Result<()> {
    prepare(toolbox, runner).await?;

    runner
        .run_with_deferred(
            CLEANUP,
            || super::terraform_destroy(toolbox, runner),
            || apply_and_validate(toolbox, runner),
        )
        .await
}

/// Deploy Tiller only; proves the module applies on a machine without kubergrunt
pub async fn run_no_kubergrunt(toolbox: &Toolbox, runner: &StageRunner) -> Result<()> {
    prepare(toolbox, runner).await?;

    runner
        .run_with_deferred(
            CLEANUP,
            || super::terraform_destroy(toolbox, runner),
            || async {
                runner
                    .run_stage(TERRAFORM_APPLY, || super::terraform_apply(toolbox, runner))
                    .await
                    .map(|_| ())
            },
        )
        .await
}

async fn apply_and_validate(toolbox: &Toolbox, runner: &StageRunner) -> Result<()> {
    runner
        .run_stage(TERRAFORM_APPLY, || super::terraform_apply(toolbox, runner))
        .await?;
    runner
        .run_stage(SETUP_HELM_CLIENT, || setup_helm_client(toolbox, runner))
        .await?;
    runner.run_stage(VALIDATE, || validate(toolbox, runner)).await?;
    Ok(())
}

async fn prepare(toolbox: &Toolbox, runner: &StageRunner) -> Result<()> {
    runner
        .run_stage(CREATE_TEST_COPY, || async {
            let module_path = super::copy_module(toolbox, runner, MODULE_DIR)?;
            super::create_helm_home(runner, &module_path)?;
            runner.store().save_string(keys::UNIQUE_ID, &unique_id())
        })
        .await?;

    runner
        .run_stage(CREATE_TERRAFORM_OPTIONS, || async {
            let store = runner.store();
            let id = store.load_string(keys::UNIQUE_ID)?;
            let helm_home: PathBuf = store.load_value(keys::HELM_HOME)?;
            let module_path: PathBuf = store.load_value(keys::MODULE_PATH)?;

            let options = tiller_options(
                &module_path,
                &helm_home,
                &id,
                &toolbox.config().helm.tiller_version,
            );
            store.save_terraform_options(&options)
        })
        .await?;

    Ok(())
}

/// Wait for Tiller, then write a helm client configuration with kubergrunt
async fn setup_helm_client(toolbox: &Toolbox, runner: &StageRunner) -> Result<()> {
    let store = runner.store();
    let helm_home: PathBuf = store.load_value(keys::HELM_HOME)?;
    let options = store.load_terraform_options()?;

    let terraform = toolbox.terraform()?;
    let tiller_namespace = terraform.output_required(&options, "tiller_namespace").await?;
    let resource_namespace = terraform.output_required(&options, "resource_namespace").await?;
    let tiller_version = options.var_str("tiller_version")?;

    let kubergrunt = toolbox.kubergrunt()?;
    let kubectl_options = KubectlOptions::default();
    kubergrunt
        .wait_for_tiller(&kubectl_options, &tiller_namespace, tiller_version)
        .await?;
    kubergrunt
        .configure(
            &kubectl_options,
            &helm_home,
            &tiller_namespace,
            &resource_namespace,
            &toolbox.config().helm.rbac_user,
        )
        .await
}

/// Install a chart into the resource namespace through the deployed Tiller
async fn validate(toolbox: &Toolbox, runner: &StageRunner) -> Result<()> {
    let store = runner.store();
    let helm_home: PathBuf = store.load_value(keys::HELM_HOME)?;
    let options = store.load_terraform_options()?;

    let resource_namespace = toolbox
        .terraform()?
        .output_required(&options, "resource_namespace")
        .await?;

    let kubectl_options = KubectlOptions::default().with_namespace(resource_namespace);
    toolbox
        .helm(helm_home)?
        .run(
            &kubectl_options,
            &["install", toolbox.config().helm.chart.as_str(), "--wait"],
        )
        .await
}
