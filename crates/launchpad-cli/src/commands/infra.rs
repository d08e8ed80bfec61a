//! plan / apply / destroy / refresh.

use anyhow::{Result, bail};
use launchpad_core::operation::{OperationKind, Plan};
use launchpad_engine::ApplyReport;

use super::Context;

fn print_plan(plan: &Plan) {
    if plan.is_empty() {
        println!("No changes. Resources match the manifest.");
        return;
    }
    for op in plan.operations() {
        let marker = match op.kind() {
            OperationKind::Create => "+",
            OperationKind::Update => "~",
            OperationKind::Delete => "-",
        };
        println!("  {} {}", marker, op.key());
    }
    println!("\nPlan: {}.", plan.summary());
}

/// Print what happened and fail if any operation failed.
fn finish(report: &ApplyReport) -> Result<()> {
    for op in &report.applied {
        println!("✓ {} {}", op.kind(), op.key());
    }
    let Some(failure) = &report.failure else {
        println!("\nApply complete: {} operations.", report.applied.len());
        return Ok(());
    };

    eprintln!("✗ {} {}: {}", failure.operation.kind(), failure.resource(), failure.error);
    for op in &report.skipped {
        eprintln!("  skipped {} {}", op.kind(), op.key());
    }
    bail!(
        "apply stopped at {} after {} operations",
        failure.resource(),
        report.applied.len()
    )
}

pub async fn plan(ctx: &Context, json: bool) -> Result<()> {
    let observed = ctx.load_state().await?;
    let reconciler = ctx.dry_run_reconciler(&observed).await;
    let plan = reconciler.plan(&ctx.manifest.resources, &observed)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_plan(&plan);
    }
    Ok(())
}

pub async fn apply(ctx: &Context, dry_run: bool) -> Result<()> {
    let observed = ctx.load_state().await?;
    let reconciler = if dry_run {
        ctx.dry_run_reconciler(&observed).await
    } else {
        ctx.reconciler()?
    };

    let plan = reconciler.plan(&ctx.manifest.resources, &observed)?;
    print_plan(&plan);
    if plan.is_empty() {
        return Ok(());
    }

    let report = reconciler.apply(plan, observed).await;
    if dry_run {
        println!("\nDry run: state left unchanged.");
    } else {
        ctx.save_state(&report.snapshot).await?;
    }
    finish(&report)
}

pub async fn destroy(ctx: &Context, confirmed: bool) -> Result<()> {
    let observed = ctx.load_state().await?;
    let reconciler = ctx.reconciler()?;
    let plan = reconciler.plan_destroy(&observed)?;
    print_plan(&plan);
    if plan.is_empty() {
        return Ok(());
    }
    if !confirmed {
        bail!("pass --yes to destroy {} resources", plan.len());
    }

    let report = reconciler.apply(plan, observed).await;
    ctx.save_state(&report.snapshot).await?;
    finish(&report)
}

pub async fn refresh(ctx: &Context) -> Result<()> {
    let observed = ctx.load_state().await?;
    let report = ctx.reconciler()?.refresh(observed).await?;

    for key in &report.dropped {
        println!("- {} no longer exists", key);
    }
    ctx.save_state(&report.snapshot).await?;
    println!(
        "Refreshed {} resources, {} dropped.",
        report.snapshot.len(),
        report.dropped.len()
    );
    Ok(())
}
