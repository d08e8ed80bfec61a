//! Manifest parsing: `settings`, `variables` and `resource` nodes.

use kdl::{KdlDocument, KdlNode, KdlValue};
use launchpad_core::reference::find_references;
use launchpad_core::{Resource, ResourceGraph, ResourceKey, ResourceKind};
use std::path::Path;
use tracing::{debug, warn};

use crate::settings::{Settings, parse_settings};
use crate::variables::VariableContext;
use crate::{ConfigError, ConfigResult};

/// A parsed and validated manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub settings: Settings,
    /// Declared resources; acyclic with every dependency declared.
    pub resources: ResourceGraph,
}

impl Manifest {
    /// The first declared registry, whose `uri` output locates pushed images.
    pub fn registry(&self) -> Option<&ResourceKey> {
        self.resources
            .iter()
            .map(|resource| &resource.key)
            .find(|key| key.kind == ResourceKind::Registry)
    }
}

/// Read and parse a manifest file, interpolating `${env.*}` from the process
/// environment.
pub fn load_manifest(path: &Path) -> ConfigResult<Manifest> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_manifest(&text, VariableContext::from_process_env())
}

/// Parse a manifest from KDL text.
///
/// `vars` supplies `${env.*}` and any preset custom variables; the manifest's
/// `variables` block and `settings` are layered on top.
pub fn parse_manifest(kdl: &str, mut vars: VariableContext) -> ConfigResult<Manifest> {
    let doc: KdlDocument = kdl.parse()?;

    for node in doc.nodes().iter().filter(|n| n.name().value() == "variables") {
        if let Some(children) = node.children() {
            for child in children.nodes() {
                let key = child.name().value().to_string();
                if let Some(val) = first_value(child) {
                    let val = vars.interpolate(&val);
                    vars.set(&key, val);
                }
            }
        }
    }

    let mut settings_nodes = doc.nodes().iter().filter(|n| n.name().value() == "settings");
    let settings_node = settings_nodes
        .next()
        .ok_or_else(|| ConfigError::MissingField("settings".to_string()))?;
    if settings_nodes.next().is_some() {
        return Err(ConfigError::Duplicate("settings".to_string()));
    }
    let settings = parse_settings(settings_node, &vars)?;
    for (name, value) in settings.variables() {
        vars.set_setting(name, value);
    }

    let mut resources = ResourceGraph::new();
    for node in doc.nodes() {
        match node.name().value() {
            "resource" => {
                let resource = parse_resource(node, &vars)?;
                debug!(resource = %resource.key, "declared resource");
                resources.add_resource(resource)?;
            }
            "settings" | "variables" => {}
            other => warn!(node = other, "ignoring unknown manifest node"),
        }
    }

    resources.validate()?;

    Ok(Manifest {
        settings,
        resources,
    })
}

fn parse_resource(node: &KdlNode, vars: &VariableContext) -> ConfigResult<Resource> {
    let args = get_all_string_args(node);
    let (kind, name) = match args.as_slice() {
        [kind, name, ..] => (kind, vars.interpolate(name)),
        [_] => return Err(ConfigError::MissingField("resource name".to_string())),
        [] => return Err(ConfigError::MissingField("resource kind".to_string())),
    };
    if name.trim().is_empty() || name.contains('.') {
        return Err(ConfigError::InvalidValue {
            field: "resource name".to_string(),
            message: format!("`{name}` must be non-empty and contain no dots"),
        });
    }
    let kind: ResourceKind = kind.parse().map_err(|_| ConfigError::InvalidValue {
        field: "resource kind".to_string(),
        message: format!("unknown resource kind: {kind}"),
    })?;

    let mut resource = Resource::new(kind, name);
    let key = resource.key.clone();

    for dep in get_string_list_prop(node, "depends-on") {
        let dep_key: ResourceKey = dep.parse().map_err(|_| {
            ConfigError::InvalidReference(format!("{key} depends-on `{dep}`: expected kind.name"))
        })?;
        resource.depends_on.insert(dep_key);
    }

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let attr = child.name().value();
            if attr == "depends-on" {
                continue;
            }
            let value = first_value(child).ok_or_else(|| ConfigError::InvalidValue {
                field: format!("{key}.{attr}"),
                message: "expected a value".to_string(),
            })?;
            let value = vars.interpolate(&value);
            for unresolved in vars.unresolved(&value) {
                warn!(resource = %key, attribute = attr, variable = %unresolved, "unresolved variable");
            }
            if resource.attributes.insert(attr.to_string(), value).is_some() {
                return Err(ConfigError::Duplicate(format!("{key}.{attr}")));
            }
        }
    }

    for (attr, value) in &resource.attributes {
        for reference in find_references(value) {
            if !resource.depends_on.contains(&reference.target) {
                return Err(ConfigError::InvalidReference(format!(
                    "{key}.{attr} references {reference} but does not depend on {}",
                    reference.target
                )));
            }
        }
    }

    Ok(resource)
}

// Helper functions for extracting values from KDL nodes

pub(crate) fn value_to_string(value: &KdlValue) -> Option<String> {
    if let Some(s) = value.as_string() {
        return Some(s.to_string());
    }
    if let Some(i) = value.as_integer() {
        return Some(i.to_string());
    }
    if let Some(f) = value.as_float() {
        return Some(f.to_string());
    }
    value.as_bool().map(|b| b.to_string())
}

fn first_value(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| value_to_string(e.value()))
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

pub(crate) fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_string_list_prop(node: &KdlNode, name: &str) -> Vec<String> {
    // Repeated properties: depends-on="a" depends-on="b"
    let mut result: Vec<String> = node
        .entries()
        .iter()
        .filter(|e| e.name().map(|n| n.value()) == Some(name))
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect();

    // Block syntax: depends-on "a" "b"
    if let Some(children) = node.children() {
        for child in children.nodes().iter().filter(|c| c.name().value() == name) {
            result.extend(get_all_string_args(child));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MANIFEST: &str = r#"
        variables {
            cidr "10.0.0.0/16"
        }

        settings {
            environment "production"
            region "us-east-1"
            repository owner="acme" name="storefront"
            container "web"
            service "storefront"
            token-secret "github-token"
            webhook-secret "github-webhook-secret"
            provider-endpoint "https://control-plane.internal/v1"
        }

        resource "service" "web" depends-on="cluster.main" depends-on="registry.images" {
            image "${registry.images.uri}:latest"
            desired-count 2
        }
        resource "network" "vpc" {
            cidr "${cidr}"
            max-azs 2
        }
        resource "registry" "images" {
            name "${settings.repository_name}-${settings.environment}"
        }
        resource "cluster" "main" depends-on="network.vpc"
    "#;

    fn parse(kdl: &str) -> ConfigResult<Manifest> {
        parse_manifest(kdl, VariableContext::new())
    }

    fn key(s: &str) -> ResourceKey {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_full_manifest() {
        let manifest = parse(MANIFEST).unwrap();

        assert_eq!(manifest.settings.environment, "production");
        assert_eq!(manifest.settings.branch, "main");
        assert_eq!(manifest.settings.namespace, "default");
        assert_eq!(manifest.settings.repository.full_name(), "acme/storefront");
        assert_eq!(
            manifest.settings.webhook_secret.as_ref().map(|s| s.as_str()),
            Some("github-webhook-secret")
        );
        assert_eq!(manifest.resources.len(), 4);
        assert_eq!(manifest.registry(), Some(&key("registry.images")));

        let vpc = manifest.resources.get(&key("network.vpc")).unwrap();
        assert_eq!(vpc.attributes["cidr"], "10.0.0.0/16");
        assert_eq!(vpc.attributes["max-azs"], "2");

        let registry = manifest.resources.get(&key("registry.images")).unwrap();
        assert_eq!(registry.attributes["name"], "storefront-production");

        let web = manifest.resources.get(&key("service.web")).unwrap();
        assert_eq!(web.attributes["image"], "${registry.images.uri}:latest");
        assert_eq!(web.depends_on.len(), 2);
    }

    #[test]
    fn test_order_follows_dependencies() {
        let manifest = parse(MANIFEST).unwrap();
        let order: Vec<String> = manifest
            .resources
            .topological_order()
            .map(|r| r.key.to_string())
            .collect();
        assert_eq!(
            order,
            vec!["network.vpc", "registry.images", "cluster.main", "service.web"]
        );
    }

    #[test]
    fn test_env_interpolation() {
        let kdl = r#"
            settings {
                environment "${env.DEPLOY_ENV}"
                repository owner="acme" name="storefront"
                container "web"
                service "storefront"
            }
        "#;
        let vars = VariableContext::new().with_env("DEPLOY_ENV", "staging");
        let manifest = parse_manifest(kdl, vars).unwrap();
        assert_eq!(manifest.settings.environment, "staging");
        assert!(manifest.resources.is_empty());
    }

    #[test]
    fn test_missing_settings() {
        let result = parse(r#"resource "network" "vpc""#);
        assert!(matches!(result, Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_missing_service_setting() {
        let kdl = r#"
            settings {
                environment "production"
                repository owner="acme" name="storefront"
                container "web"
            }
        "#;
        assert!(matches!(parse(kdl), Err(ConfigError::MissingField(f)) if f == "settings.service"));
    }

    #[test]
    fn test_unknown_kind() {
        let kdl = MANIFEST.replace(r#"resource "network" "vpc""#, r#"resource "mainframe" "vpc""#);
        assert!(matches!(parse(&kdl), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_duplicate_resource() {
        let kdl = format!("{MANIFEST}\nresource \"network\" \"vpc\"");
        assert!(matches!(parse(&kdl), Err(ConfigError::Duplicate(_))));
    }

    #[test]
    fn test_dangling_dependency() {
        let kdl = format!("{MANIFEST}\nresource \"dns-record\" \"www\" depends-on=\"load-balancer.edge\"");
        assert!(matches!(parse(&kdl), Err(ConfigError::InvalidReference(_))));
    }

    #[test]
    fn test_reference_requires_dependency() {
        let kdl = format!(
            "{MANIFEST}\nresource \"dns-record\" \"www\" {{\n target \"${{service.web.endpoint}}\"\n}}"
        );
        assert!(matches!(parse(&kdl), Err(ConfigError::InvalidReference(_))));
    }

    #[test]
    fn test_detect_cycle() {
        let kdl = r#"
            settings {
                environment "production"
                repository owner="acme" name="storefront"
                container "web"
                service "storefront"
            }
            resource "network" "a" depends-on="cluster.b"
            resource "cluster" "b" depends-on="network.a"
        "#;
        assert!(matches!(parse(kdl), Err(ConfigError::CycleDetected(_))));
    }

    #[test]
    fn test_block_depends_on() {
        let kdl = r#"
            settings {
                environment "production"
                repository owner="acme" name="storefront"
                container "web"
                service "storefront"
            }
            resource "network" "vpc"
            resource "registry" "images"
            resource "cluster" "main" {
                depends-on "network.vpc" "registry.images"
            }
        "#;
        let manifest = parse(kdl).unwrap();
        let cluster = manifest.resources.get(&key("cluster.main")).unwrap();
        assert_eq!(cluster.depends_on.len(), 2);
        assert!(cluster.attributes.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MANIFEST.as_bytes()).unwrap();

        let manifest = load_manifest(file.path()).unwrap();
        assert_eq!(manifest.settings.service, "storefront");
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_manifest(Path::new("/nonexistent/launchpad.kdl"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
