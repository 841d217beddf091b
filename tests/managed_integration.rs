//! Integration tests for managed resources.
//!
//! These exercise `Managed` against real files on disk and against
//! interruption, checking that every acquired resource is released.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use undertow::{assert_failure, assert_interrupted, assert_success, Effect, Managed, Runtime};

fn temp_file_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("undertow_managed_test_{}.txt", name))
}

/// A file that exists for as long as the scope using it.
fn temp_file(name: &str) -> Managed<(), String, PathBuf> {
    let path = temp_file_path(name);
    let acquire = Effect::partial(move || {
        std::fs::write(&path, "managed").map_err(|e| e.to_string())?;
        Ok(path)
    });
    Managed::make(acquire, |path: PathBuf| {
        Effect::total(move || {
            let _ = std::fs::remove_file(&path);
        })
    })
}

/// Counts acquisitions and releases so that leaks show up as a difference.
#[derive(Clone, Default)]
struct Ledger {
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl Ledger {
    fn resource(&self) -> Managed<(), String, usize> {
        let acquired = Arc::clone(&self.acquired);
        let released = Arc::clone(&self.released);
        Managed::make(
            Effect::total(move || acquired.fetch_add(1, Ordering::SeqCst)),
            move |_| Effect::total(move || released.fetch_add(1, Ordering::SeqCst)),
        )
    }

    fn balanced(&self) -> bool {
        self.acquired.load(Ordering::SeqCst) == self.released.load(Ordering::SeqCst)
    }
}

// ============================================================================
// File resources
// ============================================================================

#[tokio::test]
async fn files_exist_during_use_and_are_removed_after() {
    let (a, b) = (temp_file_path("seq_a"), temp_file_path("seq_b"));
    let program = temp_file("seq_a")
        .zip(temp_file("seq_b"))
        .use_(|(a, b)| Effect::total(move || a.exists() && b.exists()));

    let exit = Runtime::current().run(program).await;
    assert_success!(exit, true);
    assert!(!a.exists() && !b.exists(), "files should be removed");
}

#[tokio::test]
async fn parallel_files_are_removed_after_failure() {
    let (a, b) = (temp_file_path("par_a"), temp_file_path("par_b"));
    let program = temp_file("par_a")
        .zip_par(temp_file("par_b"))
        .use_(|_| Effect::<(), String, ()>::fail("processing failed".to_string()));

    let exit = Runtime::current().run(program).await;
    assert_failure!(exit, "processing failed".to_string());
    assert!(!a.exists() && !b.exists(), "files should be removed");
}

#[tokio::test]
async fn dependent_resources_are_released_before_their_source() {
    let source = temp_file_path("source");
    let source_alive = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&source_alive);

    let program = temp_file("source")
        .flat_map(move |path| {
            let copy = path.with_extension("copy");
            Managed::make(
                Effect::partial(move || {
                    std::fs::copy(&path, &copy).map_err(|e| e.to_string())?;
                    Ok(copy)
                }),
                move |copy: PathBuf| {
                    Effect::total(move || {
                        flag.store(copy.with_extension("txt").exists(), Ordering::SeqCst);
                        let _ = std::fs::remove_file(&copy);
                    })
                },
            )
        })
        .use_(|copy| Effect::total(move || copy.exists()));

    let exit = Runtime::current().run(program).await;
    assert_success!(exit, true);
    assert!(source_alive.load(Ordering::SeqCst));
    assert!(!source.exists());
    assert!(!source.with_extension("copy").exists());
}

// ============================================================================
// Leak freedom
// ============================================================================

#[tokio::test]
async fn interrupted_use_releases_everything() {
    let ledger = Ledger::default();
    let resources = (0..5).fold(ledger.resource().map(|_| ()), |acc, _| {
        acc.zip(ledger.resource()).map(|_| ())
    });
    let program = resources
        .use_(|_| Effect::<(), String, ()>::never())
        .fork()
        .flat_map(|fiber| {
            Effect::<(), String, ()>::sleep(Duration::from_millis(20)).zip_right(fiber.interrupt())
        });

    let exit = Runtime::current().run(program).await.into_result().unwrap();
    assert_interrupted!(exit);
    assert_eq!(ledger.acquired.load(Ordering::SeqCst), 6);
    assert!(ledger.balanced());
}

#[tokio::test]
async fn interrupted_parallel_acquisition_releases_everything() {
    let ledger = Ledger::default();
    let slow = {
        let ledger = ledger.clone();
        Managed::from_effect(Effect::<(), String, ()>::sleep(Duration::from_millis(30)))
            .flat_map(move |_| ledger.resource())
    };
    let program = ledger
        .resource()
        .zip_par(slow)
        .use_(|_| Effect::<(), String, ()>::never())
        .fork()
        .flat_map(|fiber| {
            Effect::<(), String, ()>::sleep(Duration::from_millis(10)).zip_right(fiber.interrupt())
        });

    let exit = Runtime::current().run(program).await.into_result().unwrap();
    assert_interrupted!(exit);
    assert!(ledger.balanced());
}

#[tokio::test]
async fn racing_users_release_the_loser() {
    let ledger = Ledger::default();
    let fast = ledger
        .resource()
        .use_(|_| Effect::<(), String, ()>::sleep(Duration::from_millis(5)).as_("fast"));
    let slow = ledger
        .resource()
        .use_(|_| Effect::<(), String, ()>::never().as_("slow"));

    let exit = Runtime::current().run(fast.race(slow)).await;
    assert_success!(exit, "fast");
    assert_eq!(ledger.acquired.load(Ordering::SeqCst), 2);
    assert!(ledger.balanced());
}

#[tokio::test]
async fn release_reads_the_acquiring_environment() {
    let counter = Arc::new(AtomicUsize::new(0));
    let resource = Managed::<Arc<AtomicUsize>, String, ()>::make(
        Effect::access(|c: &Arc<AtomicUsize>| {
            c.fetch_add(1, Ordering::SeqCst);
        }),
        |_| {
            Effect::access(|c: &Arc<AtomicUsize>| {
                c.fetch_sub(1, Ordering::SeqCst);
            })
        },
    );
    let observed = resource.use_(|_| Effect::access(|c: &Arc<AtomicUsize>| c.load(Ordering::SeqCst)));

    let exit = Runtime::current()
        .run_with(observed, Arc::clone(&counter))
        .await;
    assert_success!(exit, 1);
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}
