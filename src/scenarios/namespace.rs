//! Namespace-with-service-account scenarios

use crate::access::{verify_service_account_access, AccessExpectation};
use crate::common::Result;
use crate::stage::{Assertions, CheckGroup, StageRunner};
use crate::tools::kubectl::{Kubectl, KubectlOptions, NAMESPACE_ACTIVE};
use crate::tools::terraform::{ResourceCount, Terraform, TerraformOptions};
use crate::tools::Toolbox;

use super::options::{namespace_options, unique_id};
use super::{keys, CLEANUP, CREATE_TERRAFORM_OPTIONS, CREATE_TEST_COPY, TERRAFORM_APPLY, VALIDATE};

pub const MODULE_DIR: &str = "examples/k8s-namespace-with-service-account";

/// Resources planned even with `create_resources = 0`
///
/// The module's dependency getters are null resources that always exist.
pub const PLACEHOLDER_DEPENDENCY_RESOURCES: u32 = 4;

/// Apply the module, then check the namespace and both service accounts
pub async fn run(toolbox: &Toolbox, runner: &StageRunner) -> Result<()> {
    prepare(toolbox, runner, true).await?;

    runner
        .run_with_deferred(
            CLEANUP,
            || super::terraform_destroy(toolbox, runner),
            || apply_and_validate(toolbox, runner),
        )
        .await
}

/// Plan the module with resource creation disabled
pub async fn run_no_create(toolbox: &Toolbox, runner: &StageRunner) -> Result<()> {
    prepare(toolbox, runner, false).await?;

    runner
        .run_with_deferred(
            CLEANUP,
            || super::terraform_destroy(toolbox, runner),
            || async {
                runner
                    .run_stage(TERRAFORM_APPLY, || plan_nothing_created(toolbox, runner))
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
    runner.run_stage(VALIDATE, || validate(toolbox, runner)).await?;
    Ok(())
}

async fn prepare(toolbox: &Toolbox, runner: &StageRunner, create_resources: bool) -> Result<()> {
    runner
        .run_stage(CREATE_TEST_COPY, || async {
            super::copy_module(toolbox, runner, MODULE_DIR).map(|_| ())
        })
        .await?;

    runner
        .run_stage(CREATE_TERRAFORM_OPTIONS, || async {
            let store = runner.store();
            let module_path: std::path::PathBuf = store.load_value(keys::MODULE_PATH)?;
            let id = unique_id();

            let mut options = namespace_options(&id, &module_path);
            if !create_resources {
                options.set_var("create_resources", 0);
            }

            store.save_string(keys::UNIQUE_ID, &id)?;
            store.save_terraform_options(&options)
        })
        .await?;

    Ok(())
}

async fn plan_nothing_created(toolbox: &Toolbox, runner: &StageRunner) -> Result<()> {
    let options = runner.store().load_terraform_options()?;
    let plan = toolbox.terraform()?.init_and_plan(&options).await?;
    let counts = ResourceCount::parse(&plan)?;

    let mut assertions = Assertions::new();
    assertions
        .equal("resources to change", 0, counts.change)
        .equal("resources to destroy", 0, counts.destroy)
        .equal("resources to add", PLACEHOLDER_DEPENDENCY_RESOURCES, counts.add);
    assertions.finish()
}

async fn validate(toolbox: &Toolbox, runner: &StageRunner) -> Result<()> {
    let options = runner.store().load_terraform_options()?;
    let terraform = toolbox.terraform()?;
    let kubectl = toolbox.kubectl(KubectlOptions::default())?;

    // Every check must finish before the deferred cleanup destroys what they read
    let mut group = CheckGroup::new();
    group
        .add(
            "validate_namespace",
            validate_namespace(&terraform, &kubectl, &options),
        )
        .add(
            "validate_rbac_access_all",
            validate_rbac_access(
                toolbox,
                &terraform,
                &kubectl,
                &options,
                "service_account_access_all",
                AccessExpectation::READ_WRITE,
            ),
        )
        .add(
            "validate_rbac_access_read_only",
            validate_rbac_access(
                toolbox,
                &terraform,
                &kubectl,
                &options,
                "service_account_access_read_only",
                AccessExpectation::READ_ONLY,
            ),
        );
    group.run().await
}

/// The namespace exists under the output name and is active
async fn validate_namespace(
    terraform: &Terraform,
    kubectl: &Kubectl,
    options: &TerraformOptions,
) -> Result<()> {
    let name = terraform.output(options, "name").await?;
    let namespace = kubectl.get_namespace(&name).await?;

    let mut assertions = Assertions::new();
    assertions
        .equal("namespace name", name.as_str(), namespace.metadata.name.as_str())
        .equal("namespace phase", NAMESPACE_ACTIVE, namespace.status.phase.as_str());
    assertions.finish()
}

async fn validate_rbac_access(
    toolbox: &Toolbox,
    terraform: &Terraform,
    kubectl: &Kubectl,
    options: &TerraformOptions,
    service_account_output: &str,
    expected: AccessExpectation,
) -> Result<()> {
    let namespace = terraform.output(options, "name").await?;
    let service_account = terraform.output(options, service_account_output).await?;

    verify_service_account_access(toolbox, kubectl, &namespace, &service_account, expected).await
}
