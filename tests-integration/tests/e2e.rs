//! End-to-end scenarios against the in-memory services.

use std::sync::Arc;

use anyhow::Result;
use common::error::exit;
use logs::memory::InMemoryLogService;
use orchestrator::{Confirmer, StepKind, StepStatus};
use tables::memory::{FaultPlan, InMemoryTableService};
use tests_integration::fixtures::{CountingPrompt, SweepTestContext};

fn line_count(path: &std::path::Path) -> usize {
    std::fs::read_to_string(path).unwrap().lines().count()
}

/// Export a small staging set
#[tokio::test]
async fn test_export_small_staging_set() -> Result<()> {
    let ctx = SweepTestContext::new("staging")?;
    let game = ctx.seed_table("Game", 5);
    let venue = ctx.seed_table("Venue", 37);
    let user = ctx.seed_table("User", 3);
    let empty = ctx.seed_table("GameCost", 0);
    ctx.tables.create_table("Game-prod", tables::KeySchema::new("id"));

    let orchestrator = ctx.auto()?;
    let report = orchestrator.export_all().await;

    assert_eq!(report.exit_code(), exit::SUCCESS);
    let layout = orchestrator.layout();
    assert_eq!(line_count(&layout.table_csv_path(&game)), 5 + 1);
    assert_eq!(line_count(&layout.table_csv_path(&venue)), 37 + 1);
    assert_eq!(line_count(&layout.table_csv_path(&user)), 3 + 1);
    assert!(!layout.table_csv_path(&empty).exists());
    assert!(!layout.table_csv_path("Game-prod").exists());

    let step = report.step(StepKind::Export).unwrap();
    assert_eq!(step.items, 45);
    assert_eq!(step.files, 3);
    Ok(())
}

/// Clear under write throttling
#[tokio::test]
async fn test_clear_with_retries() -> Result<()> {
    let mut ctx = SweepTestContext::new("dev")?;
    ctx.config.clear.declared_tables = vec!["ScrapeURL".into()];
    let table = ctx.seed_table("ScrapeURL", 1739);
    ctx.tables.set_faults(FaultPlan {
        write_throttle_ratio: 0.3,
        seed: 42,
        ..Default::default()
    });

    let orchestrator = ctx.auto()?;
    let report = orchestrator.clear_declared().await;

    assert_eq!(report.exit_code(), exit::SUCCESS, "{:?}", report.error());
    let step = report.step(StepKind::ClearDeclared).unwrap();
    assert_eq!(step.items, 1739);
    assert!(step.retries.retries > 0);
    assert!(step.retries.throttles > 0);
    assert_eq!(step.retries.exhausted, 0);
    assert_eq!(ctx.tables.item_count(&table), 0);
    Ok(())
}

/// The cache table survives the scraper clear
#[tokio::test]
async fn test_scraper_meta_exclusion() -> Result<()> {
    let ctx = SweepTestContext::new("dev")?;
    let cache = ctx.seed_table("S3Storage", 1739);
    let models = ctx.config.scraper.tables.clone();
    let metadata: Vec<String> = models
        .iter()
        .enumerate()
        .map(|(i, model)| ctx.seed_table(model, 40 + i * 30))
        .collect();
    assert_eq!(metadata.len(), 5);

    let orchestrator = ctx.auto()?;
    let report = orchestrator.clear_scraper_meta().await;

    assert_eq!(report.exit_code(), exit::SUCCESS);
    assert_eq!(ctx.tables.item_count(&cache), 1739);
    for table in &metadata {
        assert_eq!(ctx.tables.item_count(table), 0, "{table} not drained");
    }

    let plan = report.steps[0].plan.as_ref().unwrap();
    assert_eq!(plan.protected, vec!["S3Storage"]);
    assert!(plan.entries.iter().all(|e| e.name != cache));
    Ok(())
}

/// Archive two groups, then delete them
#[tokio::test]
async fn test_archive_and_delete() -> Result<()> {
    let ctx = SweepTestContext::with_services(
        "dev",
        InMemoryTableService::new(),
        InMemoryLogService::new().with_event_page_size(100),
    )?;
    let groups = ["/aws/lambda/fetchTournament-dev", "/aws/lambda/publishResults-dev"];
    for group in groups {
        ctx.seed_log_group(
            group,
            &[
                ("2025/01/14/[$LATEST]0a1b2c3d", 20),
                ("2025/01/14/[$LATEST]4e5f6a7b", 100),
            ],
        );
    }
    ctx.seed_log_group("/aws/lambda/fetchTournament-prod", &[("s", 5)]);

    let orchestrator = ctx.auto()?;
    let report = orchestrator.archive_and_delete_logs().await;

    assert_eq!(report.exit_code(), exit::SUCCESS);
    let sidecars = ctx.sidecars();
    assert_eq!(sidecars.len(), 4);

    let mut counts: Vec<usize> = sidecars
        .iter()
        .map(|p| SweepTestContext::read_events(p).unwrap().len())
        .collect();
    counts.sort();
    assert_eq!(counts, vec![20, 20, 100, 100]);
    assert_eq!(counts.iter().filter(|&&c| c == 20).sum::<usize>(), 40);
    assert_eq!(counts.iter().filter(|&&c| c == 100).sum::<usize>(), 200);
    assert!(
        sidecars
            .iter()
            .all(|p| p.to_string_lossy().contains("___LATEST_"))
    );

    for group in groups {
        assert!(!ctx.logs.has_group(group));
    }
    assert!(ctx.logs.has_group("/aws/lambda/fetchTournament-prod"));
    Ok(())
}

/// Auto mode runs every step without asking
#[tokio::test]
async fn test_auto_mode_runs_full_sequence() -> Result<()> {
    let mut ctx = SweepTestContext::new("dev")?;
    ctx.config.clear.declared_tables = vec!["Game".into(), "Venue".into()];
    ctx.seed_table("Game", 12);
    ctx.seed_table("Venue", 4);
    ctx.seed_table("ScrapeURL", 30);
    ctx.seed_table("S3Storage", 30);
    ctx.seed_log_group("/aws/lambda/fetchTournament-dev", &[("s1", 10)]);

    let report = ctx.auto()?.run_all().await;

    assert_eq!(report.exit_code(), exit::SUCCESS);
    assert_eq!(report.steps.len(), 4);
    assert!(
        report
            .steps
            .iter()
            .all(|s| s.status == StepStatus::Succeeded)
    );
    assert!(report.steps.iter().all(|s| s.plan.as_ref().is_some_and(|p| !p.is_empty())));
    assert_eq!(ctx.tables.item_count(&ctx.table_name("S3Storage")), 30);

    // Interactive mode asks at each gate until one is refused
    let mut ctx = SweepTestContext::new("dev")?;
    ctx.config.clear.declared_tables = vec!["Game".into()];
    ctx.seed_table("Game", 3);
    ctx.seed_table("ScrapeURL", 3);
    ctx.seed_log_group("/aws/lambda/fetchTournament-dev", &[("s1", 3)]);
    let prompt = Arc::new(CountingPrompt::answering("yes"));
    let report = ctx
        .orchestrator(Confirmer::interactive(prompt.clone()), false)?
        .run_all()
        .await;

    // "yes" only satisfies the export gate
    assert_eq!(prompt.asked(), 2);
    assert_eq!(report.exit_code(), exit::ABORTED);
    assert!(prompt.questions()[1].contains("DELETE"));
    Ok(())
}

/// Dry run plans every step and changes nothing
#[tokio::test]
async fn test_dry_run_changes_nothing() -> Result<()> {
    let mut ctx = SweepTestContext::new("dev")?;
    ctx.config.clear.declared_tables = vec!["Game".into()];
    let game = ctx.seed_table("Game", 12);
    let scrape = ctx.seed_table("ScrapeURL", 30);
    ctx.seed_log_group("/aws/lambda/fetchTournament-dev", &[("s1", 10), ("s2", 3)]);

    let prompt = Arc::new(CountingPrompt::answering("no"));
    let report = ctx
        .orchestrator(Confirmer::interactive(prompt.clone()), true)?
        .run_all()
        .await;

    assert_eq!(report.exit_code(), exit::SUCCESS);
    assert_eq!(report.steps.len(), 4);
    for step in &report.steps {
        assert_eq!(step.status, StepStatus::Planned);
        let plan = step.plan.as_ref().unwrap();
        assert!(plan.dry_run);
        assert!(plan.to_string().contains("[DRY-RUN]"));
    }
    assert_eq!(report.step(StepKind::ArchiveLogs).unwrap().planned, 1);

    assert_eq!(prompt.asked(), 0);
    assert_eq!(ctx.tables.write_calls(), 0);
    assert_eq!(ctx.tables.item_count(&game), 12);
    assert_eq!(ctx.tables.item_count(&scrape), 30);
    assert_eq!(ctx.logs.deletes(), 0);
    assert_eq!(ctx.logs.event_calls(), 0);
    assert!(ctx.backup_files().is_empty());
    Ok(())
}
