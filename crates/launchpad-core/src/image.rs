//! Container images and the image-definition contract with the deploy step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::source::SourceSnapshot;

/// Tag used when no revision could be resolved, and always pushed alongside
/// the revision tag.
pub const LATEST_TAG: &str = "latest";

/// Length of the revision prefix used as an image tag.
pub const SHORT_REVISION_LEN: usize = 7;

/// Deterministic image tag for a revision: its first seven characters, or
/// `latest` when the revision is missing or blank.
pub fn image_tag(revision: Option<&str>) -> String {
    match revision.map(str::trim) {
        Some(rev) if !rev.is_empty() => rev.chars().take(SHORT_REVISION_LEN).collect(),
        _ => LATEST_TAG.to_string(),
    }
}

/// One entry of `imagedefinitions.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDefinition {
    /// Container name inside the service's task definition.
    pub name: String,
    /// `<registry-uri>:<tag>`
    pub image_uri: String,
}

impl ImageDefinition {
    pub fn new(name: impl Into<String>, image_uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image_uri: image_uri.into(),
        }
    }
}

/// Render the image-definition artifact.
pub fn image_definitions_json(definitions: &[ImageDefinition]) -> serde_json::Result<String> {
    serde_json::to_string(definitions)
}

/// A built image in a registry repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArtifact {
    /// Registry repository URI without a tag.
    pub repository: String,
    pub tag: String,
}

impl ImageArtifact {
    pub fn uri(&self) -> String {
        self.uri_for(&self.tag)
    }

    pub fn uri_for(&self, tag: &str) -> String {
        format!("{}:{}", self.repository, tag)
    }
}

/// Builds images from fetched sources and pushes them to the registry.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Name of this builder.
    fn name(&self) -> &'static str;

    /// Build an image from a source snapshot, tagged with `tag`.
    async fn build(&self, source: &SourceSnapshot, tag: &str) -> Result<ImageArtifact>;

    /// Push the image under every tag in `tags`.
    async fn push(&self, image: &ImageArtifact, tags: &[String]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_is_first_seven_characters() {
        assert_eq!(image_tag(Some("abcdef1234567")), "abcdef1");
    }

    #[test]
    fn unresolved_revision_tags_latest() {
        assert_eq!(image_tag(None), "latest");
        assert_eq!(image_tag(Some("")), "latest");
        assert_eq!(image_tag(Some("   ")), "latest");
    }

    #[test]
    fn short_revision_is_kept_whole() {
        assert_eq!(image_tag(Some("abc")), "abc");
    }

    #[test]
    fn definitions_use_camel_case_keys() {
        let json = image_definitions_json(&[ImageDefinition::new(
            "web",
            "123.dkr.ecr.us-east-1.amazonaws.com/storefront:abcdef1",
        )])
        .unwrap();
        assert_eq!(
            json,
            r#"[{"name":"web","imageUri":"123.dkr.ecr.us-east-1.amazonaws.com/storefront:abcdef1"}]"#
        );
    }
}
