// End-to-end scenarios against a real document on disk and real filesystem
// notifications

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tabsync::{
    command_bus, App, Collection, DocumentGateway, Event, Expense, Inbox, Key, Mode,
    NotifyWatchSource, Snapshot, SyncConfig, SyncNotice, SyncOrchestrator, WorkbookGateway,
};
use tempfile::TempDir;

const WINDOW: Duration = Duration::from_millis(300);

const DOC: &str = "\
@sheet,Expenses
Name,Amount
Rent,1000
Food,200
Fun,50
@sheet,Stonks
Symbol,Change,Comment,Extra
GME,-3.5,hold,2
@sheet,WatchList
Symbol,Quantity,Owned
AAPL,10,Yes
MSFT,5
NVDA,1,No
";

fn document() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data.csv");
    fs::write(&path, DOC).unwrap();
    (dir, path)
}

fn orchestrator(path: &Path) -> (SyncOrchestrator, Inbox) {
    let (bus, inbox) = command_bus();
    let config = SyncConfig {
        path: path.to_path_buf(),
        window: WINDOW,
    };
    let orch = SyncOrchestrator::new(
        config,
        Arc::new(WorkbookGateway),
        Box::new(NotifyWatchSource::new(WINDOW)),
        bus,
        Snapshot::empty(),
    );
    (orch, inbox)
}

/// Feed the orchestrator until a reload arrives, returning it
fn next_reload(orch: &mut SyncOrchestrator, inbox: &Inbox, timeout: Duration) -> Arc<Snapshot> {
    let deadline = Instant::now() + timeout;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        let event = inbox
            .recv_timeout(left)
            .unwrap_or_else(|| panic!("no reload within {:?}", timeout));
        for notice in orch.handle(event) {
            if let SyncNotice::Reloaded(snapshot) = notice {
                return snapshot;
            }
        }
    }
}

/// Feed the orchestrator until nothing arrives for `quiet`
fn settle(orch: &mut SyncOrchestrator, inbox: &Inbox, quiet: Duration) -> Vec<SyncNotice> {
    let mut seen = Vec::new();
    while let Some(event) = inbox.recv_timeout(quiet) {
        seen.extend(orch.handle(event));
    }
    seen
}

fn append(path: &Path, line: &str) {
    let contents = fs::read_to_string(path).unwrap();
    let updated = contents.replacen("Fun,50\n", &format!("Fun,50\n{}\n", line), 1);
    fs::write(path, updated).unwrap();
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[test]
fn scenario_a_total_of_three_expenses() {
    let (_dir, path) = document();
    let snapshot = WorkbookGateway.read(&path).unwrap();

    assert_eq!(
        snapshot.expenses,
        vec![
            Expense::new("Rent", 1000.0),
            Expense::new("Food", 200.0),
            Expense::new("Fun", 50.0),
        ]
    );
    assert_eq!(snapshot.total_expenses, 1250.0);
}

#[test]
fn scenario_b_external_append_is_picked_up() {
    let (_dir, path) = document();
    let (mut orch, inbox) = orchestrator(&path);
    orch.start();
    next_reload(&mut orch, &inbox, Duration::from_secs(5));
    assert!(orch.is_watching());

    let written = Instant::now();
    append(&path, "Gym,30");

    let snapshot = next_reload(&mut orch, &inbox, Duration::from_secs(5));
    assert!(written.elapsed() >= WINDOW);
    assert_eq!(snapshot.expenses.len(), 4);
    assert_eq!(snapshot.expenses[3], Expense::new("Gym", 30.0));
    assert_eq!(snapshot.total_expenses, 1280.0);
    assert!(orch.is_watching());
}

#[test]
fn scenario_c_edit_food_through_the_ui() {
    let (_dir, path) = document();
    let (bus, inbox) = command_bus();
    let config = SyncConfig {
        path: path.clone(),
        window: WINDOW,
    };
    let sync = SyncOrchestrator::new(
        config,
        Arc::new(WorkbookGateway),
        Box::new(NotifyWatchSource::new(WINDOW)),
        bus.clone(),
        Snapshot::empty(),
    );
    let mut app = App::new(sync);
    app.start();

    let mut keys = vec![Key::Enter, Key::Down, Key::Char('e'), Key::Tab];
    keys.extend(std::iter::repeat(Key::Backspace).take(6));
    keys.extend("250".chars().map(Key::Char));
    keys.push(Key::Enter);
    keys.push(Key::Interrupt);
    // the keys queue up behind the initial read, just like typing during startup
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        for key in keys {
            bus.send(Event::Key(key));
        }
    });

    app.run(&inbox, |_| Ok(())).unwrap();
    assert_eq!(app.interaction().mode(), &Mode::Viewing(Collection::Expenses));
    assert!(app.is_saving());

    // keep pumping until the forced reload lands, then make sure it was the only one
    let deadline = Instant::now() + Duration::from_secs(5);
    while app.interaction().snapshot().total_expenses != 1300.0 {
        assert!(Instant::now() < deadline, "forced reload never arrived");
        if let Some(event) = inbox.recv_timeout(Duration::from_millis(50)) {
            app.dispatch(event);
        }
    }
    while let Some(event) = inbox.recv_timeout(WINDOW * 3) {
        app.dispatch(event);
    }

    let on_disk = WorkbookGateway.read(&path).unwrap();
    assert_eq!(on_disk.expenses[1], Expense::new("Food", 250.0));
    assert_eq!(on_disk.total_expenses, 1300.0);
    assert_eq!(app.stats().writes, 1);
    assert_eq!(app.stats().reads, 2, "initial read plus exactly one forced reload");
    assert!(!app.is_saving());
    assert!(app.is_watching());
}

#[test]
fn scenario_d_burst_of_saves_reloads_once() {
    let (_dir, path) = document();
    let (mut orch, inbox) = orchestrator(&path);
    orch.start();
    next_reload(&mut orch, &inbox, Duration::from_secs(5));

    append(&path, "Gym,30");
    thread::sleep(Duration::from_millis(100));
    append(&path, "Bus,20");
    thread::sleep(Duration::from_millis(100));
    let last_save = Instant::now();
    append(&path, "Tea,5");

    let snapshot = next_reload(&mut orch, &inbox, Duration::from_secs(5));
    assert!(last_save.elapsed() >= WINDOW);
    assert_eq!(snapshot.expenses.len(), 6);
    assert_eq!(snapshot.total_expenses, 1305.0);

    let later = settle(&mut orch, &inbox, WINDOW * 2);
    assert!(
        !later.iter().any(|n| matches!(n, SyncNotice::Reloaded(_))),
        "burst produced extra reloads: {:?}",
        later
    );
    assert_eq!(orch.stats().reads, 2);
}

#[test]
fn scenario_e_short_watch_row_is_skipped() {
    let (_dir, path) = document();
    let snapshot = WorkbookGateway.read(&path).unwrap();

    let symbols: Vec<&str> = snapshot
        .watch_list
        .iter()
        .map(|w| w.symbol.as_str())
        .collect();
    assert_eq!(symbols, vec!["AAPL", "NVDA"]);
    assert_eq!(snapshot.stonks.len(), 1);
    assert_eq!(snapshot.expenses.len(), 3);
}

#[test]
fn missing_document_leaves_empty_snapshot_and_reports() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nope.csv");
    let (mut orch, inbox) = orchestrator(&path);
    orch.start();

    let notices = settle(&mut orch, &inbox, WINDOW);
    assert!(notices
        .iter()
        .any(|n| matches!(n, SyncNotice::ReadFailed(_))));
    assert_eq!(*orch.snapshot(), Snapshot::empty());

    // the file showing up later counts as an external change
    fs::write(&path, DOC).unwrap();
    let snapshot = next_reload(&mut orch, &inbox, Duration::from_secs(5));
    assert_eq!(snapshot.total_expenses, 1250.0);
}
