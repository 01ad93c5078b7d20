mod common;

use common::setup;
use protean_orm::migration::UnitResult;
use protean_orm::{
    Direction, MigrationContext, MigrationError, MigrationUnit, Migrator, RunOptions, StaticModule,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Journal = Arc<Mutex<Vec<String>>>;

async fn record(ctx: MigrationContext, journal: Journal) -> UnitResult {
    journal.lock().unwrap().push(ctx.namespace);
    Ok(())
}

async fn count(counter: Arc<AtomicUsize>) -> UnitResult {
    counter.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

async fn fails_once(attempts: Arc<AtomicUsize>) -> UnitResult {
    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
        return Err("not yet".into());
    }
    Ok(())
}

async fn explode(_ctx: MigrationContext) -> UnitResult {
    panic!("kaboom")
}

fn journaled(name: &str, deps: &[&str], journal: &Journal) -> MigrationUnit {
    let forwards = journal.clone();
    let backwards = journal.clone();
    deps.iter()
        .fold(MigrationUnit::new("app", "core", name), |u, d| u.depends_on(format!("app.core.{}", d)))
        .describe(format!("step {}", name))
        .forwards(move |ctx| record(ctx, forwards.clone()))
        .backwards(move |ctx| record(ctx, backwards.clone()))
}

fn graph(journal: &Journal) -> StaticModule {
    StaticModule::new("core")
        .with(journaled("alpha", &[], journal))
        .with(journaled("beta", &["alpha"], journal))
        .with(journaled("gamma", &["alpha"], journal))
        .with(journaled("delta", &["beta"], journal))
        .with(journaled("iota", &["gamma", "delta"], journal))
        .with(journaled("theta", &[], journal))
}

fn waves(raw: &[&[&str]]) -> Vec<Vec<String>> {
    raw.iter()
        .map(|w| w.iter().map(|n| format!("app.core.{}", n)).collect())
        .collect()
}

fn position(journal: &Journal, name: &str) -> usize {
    let ns = format!("app.core.{}", name);
    journal.lock().unwrap().iter().position(|n| *n == ns).unwrap()
}

#[tokio::test]
async fn forward_run_applies_in_dependency_waves() {
    let (registry, _) = setup().await;
    let journal = Journal::default();
    let migrator = Migrator::new(registry).with_module(graph(&journal)).with_logging(true);

    let report = migrator.run(RunOptions::forwards(&["core"])).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.direction, Direction::Forwards);
    assert_eq!(report.successes.len(), 6);
    assert_eq!(
        report.waves,
        waves(&[&["alpha", "theta"], &["beta", "gamma"], &["delta"], &["iota"]])
    );
    assert!(position(&journal, "alpha") < position(&journal, "beta"));
    assert!(position(&journal, "delta") < position(&journal, "iota"));
    assert!(position(&journal, "gamma") < position(&journal, "iota"));

    let applied = migrator.applied().await.unwrap();
    let iota = &applied["app.core.iota"];
    assert_eq!(iota.depends_on, vec!["app.core.gamma", "app.core.delta"]);
    assert_eq!(iota.description, "step iota");
    assert!(iota.applied_at.is_some());
    assert_eq!(migrator.history(2, 0).await.unwrap().len(), 2);

    let again = migrator.run(RunOptions::forwards(&["core"])).await.unwrap();
    assert!(again.successes.is_empty() && again.waves.is_empty());
    assert_eq!(journal.lock().unwrap().len(), 6);
}

#[tokio::test]
async fn backward_run_removes_dependents_first() {
    let (registry, _) = setup().await;
    let journal = Journal::default();
    let migrator = Migrator::new(registry).with_module(graph(&journal));
    migrator.run(RunOptions::forwards(&["core"])).await.unwrap();
    journal.lock().unwrap().clear();

    let report = migrator.run(RunOptions::backwards(&["core"])).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(
        report.waves,
        waves(&[&["iota", "theta"], &["gamma", "delta"], &["beta"], &["alpha"]])
    );
    assert_eq!(report.successes.len(), 6);
    assert!(position(&journal, "beta") < position(&journal, "alpha"));
    assert!(migrator.applied().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_unit_only_holds_back_its_dependents() {
    let (registry, _) = setup().await;
    let base_runs = Arc::new(AtomicUsize::new(0));
    let attempts = Arc::new(AtomicUsize::new(0));
    let (b, a) = (base_runs.clone(), attempts.clone());
    let module = StaticModule::new("shop")
        .with(MigrationUnit::new("app", "shop", "base").forwards(move |_| count(b.clone())))
        .with(
            MigrationUnit::new("app", "shop", "flaky")
                .depends_on("app.shop.base")
                .forwards(move |_| fails_once(a.clone())),
        )
        .with(MigrationUnit::new("app", "shop", "after").depends_on("app.shop.flaky"))
        .with(MigrationUnit::new("app", "shop", "other"));
    let migrator = Migrator::new(registry).with_module(module);

    let report = migrator.run(RunOptions::forwards(&["shop"])).await.unwrap();
    assert!(!report.is_clean());
    assert!(report.successes.contains_key("app.shop.base"));
    assert!(report.successes.contains_key("app.shop.other"));
    match &report.errors["app.shop.flaky"] {
        MigrationError::UnitFailed { message, .. } => assert_eq!(message, "not yet"),
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(report.pending, vec!["app.shop.after".to_string()]);
    assert!(!migrator.applied().await.unwrap().contains_key("app.shop.flaky"));

    let retry = migrator.run(RunOptions::forwards(&["shop"])).await.unwrap();
    assert!(retry.is_clean());
    let mut done: Vec<&String> = retry.successes.keys().collect();
    done.sort();
    assert_eq!(done, vec!["app.shop.after", "app.shop.flaky"]);
    assert_eq!(base_runs.load(Ordering::SeqCst), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn panicking_unit_is_reported_not_propagated() {
    let (registry, _) = setup().await;
    let module = StaticModule::new("ops")
        .with(MigrationUnit::new("app", "ops", "boom").forwards(explode))
        .with(MigrationUnit::new("app", "ops", "calm"));
    let migrator = Migrator::new(registry).with_module(module);

    let report = migrator.run(RunOptions::forwards(&["ops"])).await.unwrap();
    assert!(matches!(
        &report.errors["app.ops.boom"],
        MigrationError::UnitPanicked { message, .. } if message == "kaboom"
    ));
    assert!(report.successes.contains_key("app.ops.calm"));
    let applied = migrator.applied().await.unwrap();
    assert!(applied.contains_key("app.ops.calm") && !applied.contains_key("app.ops.boom"));
}

#[tokio::test]
async fn bad_graphs_fail_before_anything_runs() {
    let (registry, _) = setup().await;
    let runs = Arc::new(AtomicUsize::new(0));
    let r = runs.clone();
    let module = StaticModule::new("loop")
        .with(MigrationUnit::new("app", "loop", "free").forwards(move |_| count(r.clone())))
        .with(MigrationUnit::new("app", "loop", "a").depends_on("app.loop.b"))
        .with(MigrationUnit::new("app", "loop", "b").depends_on("app.loop.a"));
    let migrator = Migrator::new(registry).with_module(module);

    match migrator.run(RunOptions::forwards(&["loop"])).await {
        Err(MigrationError::Cycle(stuck)) => assert_eq!(stuck, vec!["app.loop.a", "app.loop.b"]),
        other => panic!("expected a cycle, got {:?}", other),
    }
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(matches!(
        migrator.run(RunOptions::forwards(&["nope"])).await,
        Err(MigrationError::UnknownModule(name)) if name == "nope"
    ));
}
