//! Roll a prebuilt image out without running the pipeline.

use anyhow::Result;
use launchpad_api::bootstrap;
use launchpad_core::image::ImageDefinition;

use super::Context;

pub async fn deploy(ctx: &Context, image: &str, container: Option<String>) -> Result<()> {
    let settings = ctx.settings();
    let container = container.unwrap_or_else(|| settings.container.clone());
    let rollout = bootstrap::rollout_controller(settings).await?;

    println!("Deploying {} to {}/{}", image, settings.service, container);
    let report = rollout
        .deploy(&settings.service, &[ImageDefinition::new(container, image)])
        .await?;
    println!(
        "✓ {} steady at revision {} after {} checks",
        report.service, report.revision, report.attempts
    );
    Ok(())
}
