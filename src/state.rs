// Interaction State Machine
//
//   Menu ──select──▶ Viewing(screen) ──startEdit / startNew──▶ Editing(screen, session)
//        ◀──back───                  ◀──commit / cancel─────
//
// A new Snapshot is accepted in every state. It never closes an open edit and
// never touches the draft; the session re-locates the row it was opened on.
//
// Commits build on the last committed snapshot until the orchestrator has
// settled, so a second commit made before the reload keeps the first one.

use crate::bus::Key;
use crate::editor::{Draft, EditorOutcome, FieldEditor, InlineForm};
use crate::error::TransitionError;
use crate::model::{Collection, Row, Snapshot, Target};
use crate::sync::SyncNotice;
use chrono::{DateTime, Local};
use std::sync::Arc;
use tracing::{debug, warn};

// ============================================================================
// TYPES
// ============================================================================

/// Transient state for one edit
#[derive(Debug, Clone, PartialEq)]
pub struct EditSession {
    collection: Collection,
    target: Target,
    /// Row value at the moment the session was opened
    pinned: Option<Row>,
    draft: Draft,
    conflicted: bool,
}

impl EditSession {
    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn draft_mut(&mut self) -> &mut Draft {
        &mut self.draft
    }

    /// The edited row vanished from the document since the session opened
    pub fn is_conflicted(&self) -> bool {
        self.conflicted
    }

    /// Follow the pinned row into a freshly loaded snapshot
    fn rebase(&mut self, snapshot: &Snapshot) {
        let (Target::Existing(index), Some(pinned)) = (self.target, self.pinned.as_ref()) else {
            return;
        };

        if snapshot.row(self.collection, index).as_ref() == Some(pinned) {
            self.conflicted = false;
            return;
        }

        match snapshot.position_of(pinned) {
            Some(moved) => {
                debug!("edited row moved {} -> {}", index, moved);
                self.target = Target::Existing(moved);
                self.conflicted = false;
            }
            None => {
                warn!("edited row {} no longer in {:?}", index, self.collection);
                self.conflicted = true;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Menu,
    Viewing(Collection),
    Editing(Collection, EditSession),
}

/// What the loop has to do on behalf of the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    None,
    Write(Snapshot),
    Reload,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerKind {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Banner {
    pub kind: BannerKind,
    pub text: String,
}

// ============================================================================
// STATE MACHINE
// ============================================================================

pub struct Interaction {
    mode: Mode,
    snapshot: Arc<Snapshot>,
    /// Latest commit the document has not yet been reloaded with
    committed: Option<Snapshot>,
    menu_cursor: usize,
    cursors: [usize; 3],
    banner: Option<Banner>,
    editor: Box<dyn FieldEditor>,
    last_reload: Option<DateTime<Local>>,
}

impl Interaction {
    pub fn new(snapshot: Arc<Snapshot>) -> Self {
        Self::with_editor(snapshot, Box::new(InlineForm))
    }

    pub fn with_editor(snapshot: Arc<Snapshot>, editor: Box<dyn FieldEditor>) -> Self {
        Self {
            mode: Mode::Menu,
            snapshot,
            committed: None,
            menu_cursor: 0,
            cursors: [0; 3],
            banner: None,
            editor,
            last_reload: None,
        }
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Base for edits: the last commit if one is outstanding, else what is shown
    pub fn working(&self) -> &Snapshot {
        self.committed.as_ref().unwrap_or(&*self.snapshot)
    }

    pub fn has_unconfirmed_commit(&self) -> bool {
        self.committed.is_some()
    }

    pub fn menu_cursor(&self) -> usize {
        self.menu_cursor
    }

    pub fn cursor(&self, collection: Collection) -> usize {
        self.cursors[collection.index()]
    }

    pub fn banner(&self) -> Option<&Banner> {
        self.banner.as_ref()
    }

    pub fn last_reload(&self) -> Option<DateTime<Local>> {
        self.last_reload
    }

    pub fn session(&self) -> Option<&EditSession> {
        match &self.mode {
            Mode::Editing(_, session) => Some(session),
            _ => None,
        }
    }

    pub fn session_mut(&mut self) -> Option<&mut EditSession> {
        match &mut self.mode {
            Mode::Editing(_, session) => Some(session),
            _ => None,
        }
    }

    /// The collection on screen, if any
    pub fn screen(&self) -> Option<Collection> {
        match &self.mode {
            Mode::Menu => None,
            Mode::Viewing(c) | Mode::Editing(c, _) => Some(*c),
        }
    }

    pub fn set_banner(&mut self, kind: BannerKind, text: impl Into<String>) {
        self.banner = Some(Banner {
            kind,
            text: text.into(),
        });
    }

    pub fn clear_banner(&mut self) {
        self.banner = None;
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    pub fn select(&mut self, screen: Collection) -> Result<(), TransitionError> {
        match self.mode {
            Mode::Menu => {
                self.menu_cursor = screen.index();
                self.mode = Mode::Viewing(screen);
                Ok(())
            }
            _ => Err(TransitionError::NotInMenu),
        }
    }

    pub fn back(&mut self) -> Result<(), TransitionError> {
        match self.mode {
            Mode::Menu => Ok(()),
            Mode::Viewing(_) => {
                self.mode = Mode::Menu;
                Ok(())
            }
            Mode::Editing(..) => Err(TransitionError::SessionOpen),
        }
    }

    /// Open an edit of row `index` on the current screen
    pub fn start_edit(&mut self, index: usize) -> Result<(), TransitionError> {
        let screen = self.viewing()?;
        let base = self.working();
        let row = base.row(screen, index).ok_or(TransitionError::NoSuchRow {
            index,
            len: base.len(screen),
        })?;

        self.cursors[screen.index()] = index;
        self.mode = Mode::Editing(
            screen,
            EditSession {
                collection: screen,
                target: Target::Existing(index),
                draft: Draft::from_row(&row),
                pinned: Some(row),
                conflicted: false,
            },
        );
        Ok(())
    }

    pub fn start_new(&mut self) -> Result<(), TransitionError> {
        let screen = self.viewing()?;
        self.mode = Mode::Editing(
            screen,
            EditSession {
                collection: screen,
                target: Target::New,
                draft: Draft::blank(screen),
                pinned: None,
                conflicted: false,
            },
        );
        Ok(())
    }

    /// Close the session and hand back the snapshot to persist.
    ///
    /// On error the session stays open with its draft intact.
    pub fn commit(&mut self) -> Result<Snapshot, TransitionError> {
        let Mode::Editing(screen, session) = &self.mode else {
            return Err(TransitionError::NotEditing);
        };
        if session.conflicted {
            return Err(TransitionError::StaleSession);
        }

        let row = session.draft.to_row()?;
        let target = session.target;
        let next = self.working().with_row(target, row)?;
        let screen = *screen;

        self.cursors[screen.index()] = match target {
            Target::Existing(i) => i,
            Target::New => next.len(screen) - 1,
        };
        self.mode = Mode::Viewing(screen);
        self.committed = Some(next.clone());
        Ok(next)
    }

    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        match self.mode {
            Mode::Editing(screen, _) => {
                self.mode = Mode::Viewing(screen);
                Ok(())
            }
            _ => Err(TransitionError::NotEditing),
        }
    }

    /// Swap in a freshly loaded snapshot, whatever state we are in
    pub fn replace_snapshot(&mut self, snapshot: Arc<Snapshot>) {
        self.snapshot = snapshot;

        if self.committed.is_none() {
            self.follow_base();
        }
    }

    /// The orchestrator has settled: the shown snapshot is the base again
    pub fn confirm_commits(&mut self) {
        if self.committed.take().is_some() {
            debug!("commits confirmed by reload");
            self.follow_base();
        }
    }

    /// Clamp cursors and rebase an open session onto the shown snapshot
    fn follow_base(&mut self) {
        for collection in Collection::ALL {
            let len = self.snapshot.len(collection);
            let cursor = &mut self.cursors[collection.index()];
            *cursor = (*cursor).min(len.saturating_sub(1));
        }

        let snapshot = Arc::clone(&self.snapshot);
        if let Mode::Editing(_, session) = &mut self.mode {
            session.rebase(&snapshot);
            if session.conflicted {
                self.banner = Some(Banner {
                    kind: BannerKind::Error,
                    text: TransitionError::StaleSession.to_string(),
                });
            }
        }
    }

    /// React to the orchestrator
    pub fn apply_notice(&mut self, notice: SyncNotice) {
        match notice {
            SyncNotice::Reloaded(snapshot) => {
                self.last_reload = Some(Local::now());
                self.banner = None;
                self.replace_snapshot(snapshot);
            }
            SyncNotice::Saved => self.set_banner(BannerKind::Info, "Saved, reloading..."),
            SyncNotice::ReadFailed(msg) => {
                self.set_banner(BannerKind::Error, format!("Reload failed: {}", msg))
            }
            SyncNotice::WriteFailed(msg) => {
                self.set_banner(BannerKind::Error, format!("Save failed: {}", msg))
            }
            SyncNotice::WatchFailed(msg) => {
                self.set_banner(BannerKind::Error, format!("Watching paused: {}", msg))
            }
        }
    }

    fn viewing(&self) -> Result<Collection, TransitionError> {
        match self.mode {
            Mode::Viewing(screen) => Ok(screen),
            Mode::Editing(..) => Err(TransitionError::SessionOpen),
            Mode::Menu => Err(TransitionError::NotViewing),
        }
    }

    // ------------------------------------------------------------------------
    // Keys
    // ------------------------------------------------------------------------

    pub fn handle_key(&mut self, key: Key) -> Command {
        if key == Key::Interrupt {
            return Command::Quit;
        }

        let result = match self.mode {
            Mode::Menu => self.menu_key(key),
            Mode::Viewing(screen) => self.viewing_key(screen, key),
            Mode::Editing(..) => self.editing_key(key),
        };

        match result {
            Ok(command) => command,
            Err(e) => {
                debug!("rejected key {:?}: {}", key, e);
                self.set_banner(BannerKind::Error, e.to_string());
                Command::None
            }
        }
    }

    fn menu_key(&mut self, key: Key) -> Result<Command, TransitionError> {
        let count = Collection::ALL.len();
        match key {
            Key::Char('q') => return Ok(Command::Quit),
            Key::Up | Key::Char('k') => self.menu_cursor = (self.menu_cursor + count - 1) % count,
            Key::Down | Key::Char('j') => self.menu_cursor = (self.menu_cursor + 1) % count,
            Key::Enter => self.select(Collection::ALL[self.menu_cursor])?,
            Key::Char(c @ '1'..='3') => {
                let index = c as usize - '1' as usize;
                self.select(Collection::ALL[index])?
            }
            _ => {}
        }
        Ok(Command::None)
    }

    fn viewing_key(&mut self, screen: Collection, key: Key) -> Result<Command, TransitionError> {
        let len = self.working().len(screen);
        let cursor = &mut self.cursors[screen.index()];

        match key {
            Key::Char('q') => return Ok(Command::Quit),
            Key::Char('r') => return Ok(Command::Reload),
            Key::Char('b') | Key::Esc => self.back()?,
            Key::Down | Key::Char('j') if len > 0 => *cursor = (*cursor + 1) % len,
            Key::Up | Key::Char('k') if len > 0 => *cursor = (*cursor + len - 1) % len,
            Key::Tab => self.switch_screen(screen, 1),
            Key::BackTab => self.switch_screen(screen, Collection::ALL.len() - 1),
            Key::Char('e') => {
                if len == 0 {
                    self.set_banner(BannerKind::Info, "Nothing to edit yet, press n to add a row");
                } else {
                    let index = *cursor;
                    self.start_edit(index)?;
                }
            }
            Key::Char('n') => self.start_new()?,
            _ => {}
        }
        Ok(Command::None)
    }

    fn switch_screen(&mut self, screen: Collection, step: usize) {
        let next = Collection::ALL[(screen.index() + step) % Collection::ALL.len()];
        self.menu_cursor = next.index();
        self.mode = Mode::Viewing(next);
    }

    fn editing_key(&mut self, key: Key) -> Result<Command, TransitionError> {
        let outcome = match &mut self.mode {
            Mode::Editing(_, session) => self.editor.handle_key(&mut session.draft, key),
            _ => return Err(TransitionError::NotEditing),
        };

        match outcome {
            EditorOutcome::Continue => Ok(Command::None),
            EditorOutcome::Cancel => {
                self.cancel()?;
                Ok(Command::None)
            }
            EditorOutcome::Submit => {
                let next = self.commit()?;
                Ok(Command::Write(next))
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
