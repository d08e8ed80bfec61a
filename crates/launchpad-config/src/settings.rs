//! Process-wide settings from the manifest's `settings` block.

use kdl::KdlNode;
use launchpad_core::secret::SecretRef;
use launchpad_core::source::RepositoryRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::manifest::{get_string_prop, value_to_string};
use crate::variables::VariableContext;
use crate::{ConfigError, ConfigResult};

pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_REGISTRY_USERNAME: &str = "AWS";
pub const DEFAULT_BUILDER_IMAGE: &str = "docker:27-cli";

/// Settings read once at startup and shared immutably afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Environment name; keys the state snapshot.
    pub environment: String,
    pub account: Option<String>,
    pub region: Option<String>,
    /// Source repository watched for pushes.
    pub repository: RepositoryRef,
    /// Branch whose pushes trigger pipeline runs.
    pub branch: String,
    /// Container name inside the service, used in image definitions.
    pub container: String,
    /// Service rolled out by the deploy stage.
    pub service: String,
    /// Kubernetes namespace of the service.
    pub namespace: String,
    /// Registry repository URI; taken from the registry resource's `uri`
    /// output when unset.
    pub registry_uri: Option<String>,
    pub registry_username: String,
    /// Image used for build and push jobs.
    pub builder_image: String,
    pub token_secret: Option<SecretRef>,
    pub webhook_secret: Option<SecretRef>,
    pub registry_password_secret: Option<SecretRef>,
    pub provider_endpoint: Option<Url>,
}

impl Settings {
    /// Variables exposed to the rest of the manifest as `${settings.*}`.
    pub fn variables(&self) -> Vec<(&'static str, String)> {
        let mut vars = vec![
            ("environment", self.environment.clone()),
            ("repository_owner", self.repository.owner.clone()),
            ("repository_name", self.repository.name.clone()),
            ("branch", self.branch.clone()),
            ("container", self.container.clone()),
            ("service", self.service.clone()),
            ("namespace", self.namespace.clone()),
        ];
        if let Some(account) = &self.account {
            vars.push(("account", account.clone()));
        }
        if let Some(region) = &self.region {
            vars.push(("region", region.clone()));
        }
        vars
    }
}

/// Parse the `settings` block, interpolating values with `vars`.
pub(crate) fn parse_settings(node: &KdlNode, vars: &VariableContext) -> ConfigResult<Settings> {
    let mut environment = None;
    let mut account = None;
    let mut region = None;
    let mut repository = None;
    let mut branch = None;
    let mut container = None;
    let mut service = None;
    let mut namespace = None;
    let mut registry_uri = None;
    let mut registry_username = None;
    let mut builder_image = None;
    let mut token_secret = None;
    let mut webhook_secret = None;
    let mut registry_password_secret = None;
    let mut provider_endpoint = None;

    let Some(children) = node.children() else {
        return Err(ConfigError::MissingField("settings.environment".to_string()));
    };

    for child in children.nodes() {
        let field = child.name().value();
        if field == "repository" {
            let owner = get_string_prop(child, "owner")
                .ok_or_else(|| ConfigError::MissingField("settings.repository owner".to_string()))?;
            let name = get_string_prop(child, "name")
                .ok_or_else(|| ConfigError::MissingField("settings.repository name".to_string()))?;
            repository = Some(RepositoryRef::new(
                vars.interpolate(&owner),
                vars.interpolate(&name),
            ));
            continue;
        }

        let value = child
            .entries()
            .iter()
            .find(|e| e.name().is_none())
            .and_then(|e| value_to_string(e.value()))
            .map(|v| vars.interpolate(&v))
            .ok_or_else(|| ConfigError::InvalidValue {
                field: format!("settings.{field}"),
                message: "expected a value".to_string(),
            })?;

        let slot = match field {
            "environment" => &mut environment,
            "account" => &mut account,
            "region" => &mut region,
            "branch" => &mut branch,
            "container" => &mut container,
            "service" => &mut service,
            "namespace" => &mut namespace,
            "registry-uri" => &mut registry_uri,
            "registry-username" => &mut registry_username,
            "builder-image" => &mut builder_image,
            "token-secret" => &mut token_secret,
            "webhook-secret" => &mut webhook_secret,
            "registry-password-secret" => &mut registry_password_secret,
            "provider-endpoint" => &mut provider_endpoint,
            other => {
                tracing::warn!(field = other, "ignoring unknown setting");
                continue;
            }
        };
        if slot.replace(value).is_some() {
            return Err(ConfigError::Duplicate(format!("settings.{field}")));
        }
    }

    let provider_endpoint = provider_endpoint
        .map(|raw| {
            Url::parse(&raw).map_err(|e| ConfigError::InvalidValue {
                field: "settings.provider-endpoint".to_string(),
                message: e.to_string(),
            })
        })
        .transpose()?;

    let environment = required(environment, "environment")?;
    if environment.contains(['/', '\\']) || environment.starts_with('.') {
        return Err(ConfigError::InvalidValue {
            field: "settings.environment".to_string(),
            message: format!("`{environment}` is not a valid environment name"),
        });
    }

    Ok(Settings {
        environment,
        account,
        region,
        repository: repository
            .ok_or_else(|| ConfigError::MissingField("settings.repository".to_string()))?,
        branch: branch.unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
        container: required(container, "container")?,
        service: required(service, "service")?,
        namespace: namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
        registry_uri,
        registry_username: registry_username
            .unwrap_or_else(|| DEFAULT_REGISTRY_USERNAME.to_string()),
        builder_image: builder_image.unwrap_or_else(|| DEFAULT_BUILDER_IMAGE.to_string()),
        token_secret: token_secret.map(SecretRef::new),
        webhook_secret: webhook_secret.map(SecretRef::new),
        registry_password_secret: registry_password_secret.map(SecretRef::new),
        provider_endpoint,
    })
}

fn required(value: Option<String>, field: &str) -> ConfigResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingField(format!("settings.{field}")))
}

