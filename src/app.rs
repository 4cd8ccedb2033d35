// Interaction loop
// Pulls one bus message at a time and routes it: keys to the state machine,
// everything else to the orchestrator, whose notices flow back to the screen.

use crate::bus::{Event, Inbox};
use crate::state::{Command, Interaction};
use crate::sync::{SyncOrchestrator, SyncStats};
use anyhow::Result;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct App {
    sync: SyncOrchestrator,
    ui: Interaction,
}

impl App {
    pub fn new(sync: SyncOrchestrator) -> Self {
        let ui = Interaction::new(sync.snapshot());
        Self { sync, ui }
    }

    /// Trigger the initial load
    pub fn start(&mut self) {
        self.sync.start();
    }

    pub fn interaction(&self) -> &Interaction {
        &self.ui
    }

    pub fn is_saving(&self) -> bool {
        self.sync.is_saving()
    }

    pub fn is_watching(&self) -> bool {
        self.sync.is_watching()
    }

    pub fn stats(&self) -> SyncStats {
        self.sync.stats()
    }

    pub fn dispatch(&mut self, event: Event) -> Flow {
        match event {
            Event::Key(key) => match self.ui.handle_key(key) {
                Command::None => {}
                Command::Write(next) => {
                    debug!("committing edit");
                    self.ui.clear_banner();
                    self.sync.commit_write(next);
                }
                Command::Reload => self.sync.reload(),
                Command::Quit => return Flow::Quit,
            },
            Event::Resize => {}
            other => {
                for notice in self.sync.handle(other) {
                    self.ui.apply_notice(notice);
                }
                if !self.sync.is_saving() {
                    self.ui.confirm_commits();
                }
            }
        }
        Flow::Continue
    }

    /// Draw, wait for the next message, apply it. Ends on quit or when every
    /// producer is gone.
    pub fn run<F>(&mut self, inbox: &Inbox, mut draw: F) -> Result<()>
    where
        F: FnMut(&App) -> Result<()>,
    {
        loop {
            draw(self)?;

            let Some(event) = inbox.recv() else {
                info!("bus closed, leaving");
                return Ok(());
            };
            if self.dispatch(event) == Flow::Quit {
                info!("quit requested");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{command_bus, CommandBus, Key};
    use crate::error::WatchError;
    use crate::gateway::{DocumentGateway, WorkbookGateway};
    use crate::model::{Collection, Snapshot};
    use crate::state::Mode;
    use crate::sync::SyncConfig;
    use crate::watcher::{Subscription, WatchSource};
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const DOC: &str = "\
@sheet,Expenses
Name,Amount
Rent,1000
Food,200
Fun,50
@sheet,Stonks
Symbol,Change,Comment,Extra
@sheet,WatchList
Symbol,Quantity,Owned
";

    struct QuietSource;

    impl WatchSource for QuietSource {
        fn subscribe(
            &self,
            _path: &Path,
            generation: u64,
            _bus: CommandBus,
        ) -> Result<Subscription, WatchError> {
            Ok(Subscription::detached(generation))
        }
    }

    fn app_for(dir: &TempDir) -> (App, Inbox, CommandBus) {
        let path = dir.path().join("data.csv");
        fs::write(&path, DOC).unwrap();

        let (bus, inbox) = command_bus();
        let config = SyncConfig {
            path,
            window: Duration::from_millis(50),
        };
        let sync = SyncOrchestrator::new(
            config,
            Arc::new(WorkbookGateway),
            Box::new(QuietSource),
            bus.clone(),
            Snapshot::empty(),
        );
        (App::new(sync), inbox, bus)
    }

    fn pump_until(app: &mut App, inbox: &Inbox, done: impl Fn(&App) -> bool) {
        while !done(app) {
            let event = inbox
                .recv_timeout(Duration::from_secs(3))
                .expect("timed out waiting for the bus");
            app.dispatch(event);
        }
    }

    #[test]
    fn test_start_loads_document() {
        let dir = TempDir::new().unwrap();
        let (mut app, inbox, _bus) = app_for(&dir);
        app.start();
        pump_until(&mut app, &inbox, |a| a.interaction().last_reload().is_some());

        assert_eq!(app.interaction().snapshot().expenses.len(), 3);
        assert_eq!(app.interaction().snapshot().total_expenses, 1250.0);
        assert!(app.is_watching());
    }

    #[test]
    fn test_edit_round_trips_through_document() {
        let dir = TempDir::new().unwrap();
        let (mut app, inbox, _bus) = app_for(&dir);
        app.start();
        pump_until(&mut app, &inbox, |a| a.interaction().last_reload().is_some());

        let mut keys = vec![Key::Char('1'), Key::Down, Key::Char('e'), Key::Tab];
        keys.extend(std::iter::repeat(Key::Backspace).take(6));
        keys.extend("250".chars().map(Key::Char));
        keys.push(Key::Enter);
        for key in keys {
            assert_eq!(app.dispatch(Event::Key(key)), Flow::Continue);
        }
        assert!(app.is_saving());

        pump_until(&mut app, &inbox, |a| {
            a.interaction().snapshot().total_expenses == 1300.0
        });
        assert_eq!(app.interaction().snapshot().expenses[1].amount, 250.0);
        assert_eq!(app.interaction().mode(), &Mode::Viewing(Collection::Expenses));
        assert_eq!(app.stats().writes, 1);
    }

    #[test]
    fn test_quick_successive_adds_all_reach_the_document() {
        let dir = TempDir::new().unwrap();
        let (mut app, inbox, _bus) = app_for(&dir);
        app.start();
        pump_until(&mut app, &inbox, |a| a.interaction().last_reload().is_some());

        let mut keys = vec![Key::Char('1')];
        for name in ["Gym", "Tax"] {
            keys.push(Key::Char('n'));
            keys.extend(name.chars().map(Key::Char));
            keys.push(Key::Enter);
        }
        for key in keys {
            app.dispatch(Event::Key(key));
        }

        pump_until(&mut app, &inbox, |a| {
            !a.is_saving() && a.interaction().snapshot().expenses.len() == 5
        });
        assert!(!app.interaction().has_unconfirmed_commit());

        let on_disk = WorkbookGateway.read(&dir.path().join("data.csv")).unwrap();
        let names: Vec<_> = on_disk.expenses.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Rent", "Food", "Fun", "Gym", "Tax"]);
    }

    #[test]
    fn test_quit_and_resize() {
        let dir = TempDir::new().unwrap();
        let (mut app, _inbox, _bus) = app_for(&dir);
        assert_eq!(app.dispatch(Event::Resize), Flow::Continue);
        assert_eq!(app.dispatch(Event::Key(Key::Char('q'))), Flow::Quit);
    }

    #[test]
    fn test_run_draws_until_quit() {
        let dir = TempDir::new().unwrap();
        let (mut app, inbox, bus) = app_for(&dir);
        bus.send(Event::Key(Key::Char('2')));
        bus.send(Event::Key(Key::Interrupt));

        let mut frames = 0;
        app.run(&inbox, |_| {
            frames += 1;
            Ok(())
        })
        .unwrap();

        assert_eq!(frames, 2);
        assert_eq!(app.interaction().mode(), &Mode::Viewing(Collection::Stonks));
    }
}
