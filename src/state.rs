use image::DynamicImage;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use crossbeam_channel::Receiver;

use crate::cluster::{DuplicateGroup, DuplicateSet};
use crate::error::panic_message;
use crate::fileops::{spawn_delete, DeleteOutcome, Deleter, RetryPolicy};
use crate::media::{classify, MediaKind};
use crate::preview::PreviewSource;
use crate::scanner::{default_image_extensions, default_video_extensions};
use crate::sink::Sink;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionIntent {
    NextGroup,
    PrevGroup,
    NextImage,
    PrevImage,
    ToggleKeep(usize),
    SetKeep(usize, bool),
    DeleteUnselected,
    Stop,
}

#[derive(Debug)]
pub enum IntentOutcome {
    /// Precondition failed, nothing changed.
    Ignored,
    Done,
    Deleting(PendingDeletions),
    /// The operation panicked; state is as it was before.
    Failed(String),
}

/// One file of the active group, as the presentation layer sees it.
#[derive(Debug, Clone)]
pub struct FileItem {
    pub path: String,
    pub kind: MediaKind,
    pub keep: bool,
    pub preview: Option<DynamicImage>,
    pub dims: String,
    pub duration: String,
}

impl FileItem {
    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub group: usize,
    pub file: usize,
}

#[derive(Debug, Clone)]
pub struct ActiveSession {
    set: DuplicateSet,
    cursor: Cursor,
    items: Vec<FileItem>,
}

#[derive(Debug, Clone, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Active(ActiveSession),
}

/// Background deletions dispatched by one `delete_unselected` call.
#[derive(Debug, Default)]
pub struct PendingDeletions {
    receivers: Vec<Receiver<DeleteOutcome>>,
    /// Files already gone from disk; no request was made for them.
    pub skipped: Vec<PathBuf>,
}

impl PendingDeletions {
    pub fn dispatched(&self) -> usize {
        self.receivers.len()
    }

    /// Blocks until every worker has posted its outcome.
    pub fn wait(self) -> Vec<DeleteOutcome> {
        self.receivers.into_iter().filter_map(|rx| rx.recv().ok()).collect()
    }
}

pub struct Session {
    state: SessionState,
    deleter: Arc<dyn Deleter>,
    retry: RetryPolicy,
    previews: Arc<dyn PreviewSource>,
    sink: Arc<dyn Sink>,
    image_extensions: Vec<String>,
    video_extensions: Vec<String>,
}

// --- Predicates ---

pub fn can_start(session: &Session, set: Option<&DuplicateSet>) -> bool {
    !session.is_active() && set.is_some_and(|s| !s.is_empty())
}

pub fn can_stop(session: &Session) -> bool {
    session.is_active()
}

pub fn can_next_group(session: &Session) -> bool {
    session.active().is_some_and(|a| a.cursor.group + 1 < a.set.len())
}

pub fn can_prev_group(session: &Session) -> bool {
    session.active().is_some_and(|a| a.cursor.group > 0)
}

pub fn can_next_image(session: &Session) -> bool {
    session.active().is_some_and(|a| a.cursor.file + 1 < a.items.len())
}

pub fn can_prev_image(session: &Session) -> bool {
    session.active().is_some_and(|a| a.cursor.file > 0)
}

pub fn can_toggle_keep(session: &Session, index: usize) -> bool {
    session.active().is_some_and(|a| index < a.items.len())
}

pub fn can_delete(session: &Session) -> bool {
    session.active().is_some_and(|a| a.items.iter().any(|i| !i.keep))
}

pub fn can_open(session: &Session) -> bool {
    session.current_file_path().is_some_and(|p| p.exists())
}

/// Drops `removed` paths from every group and prunes groups below two members.
///
/// Returns the new set and the group index that keeps the operator in place:
/// the number of surviving groups that stood strictly before `group_idx`,
/// clamped to the last one. `None` when nothing survives.
pub fn reconcile(set: &DuplicateSet, removed: &HashSet<String>, group_idx: usize) -> (DuplicateSet, Option<usize>) {
    let mut new_idx = 0;
    let mut groups = Vec::with_capacity(set.len());

    for (i, group) in set.iter().enumerate() {
        let members: Vec<String> = group.members.iter().filter(|m| !removed.contains(*m)).cloned().collect();
        if members.len() < 2 { continue; }
        if i < group_idx { new_idx += 1; }
        groups.push(DuplicateGroup { members });
    }

    let new_set = DuplicateSet::new(set.root.clone(), groups);
    if new_set.is_empty() {
        return (new_set, None);
    }
    let new_idx = new_idx.min(new_set.len() - 1);
    (new_set, Some(new_idx))
}

impl Session {
    pub fn new(
        deleter: Arc<dyn Deleter>,
        retry: RetryPolicy,
        previews: Arc<dyn PreviewSource>,
        sink: Arc<dyn Sink>,
    ) -> Self {
        Self {
            state: SessionState::Idle,
            deleter,
            retry,
            previews,
            sink,
            image_extensions: default_image_extensions(),
            video_extensions: default_video_extensions(),
        }
    }

    /// Extension lists used to tell videos from images when building FileItems.
    pub fn with_extensions(mut self, image_extensions: Vec<String>, video_extensions: Vec<String>) -> Self {
        self.image_extensions = image_extensions;
        self.video_extensions = video_extensions;
        self
    }

    pub fn is_active(&self) -> bool { matches!(self.state, SessionState::Active(_)) }

    fn active(&self) -> Option<&ActiveSession> {
        match &self.state {
            SessionState::Active(a) => Some(a),
            SessionState::Idle => None,
        }
    }

    fn active_mut(&mut self) -> Option<&mut ActiveSession> {
        match &mut self.state {
            SessionState::Active(a) => Some(a),
            SessionState::Idle => None,
        }
    }

    pub fn cursor(&self) -> Option<Cursor> { self.active().map(|a| a.cursor) }
    pub fn set(&self) -> Option<&DuplicateSet> { self.active().map(|a| &a.set) }
    pub fn items(&self) -> &[FileItem] { self.active().map(|a| a.items.as_slice()).unwrap_or(&[]) }
    pub fn current_item(&self) -> Option<&FileItem> { self.active().and_then(|a| a.items.get(a.cursor.file)) }

    pub fn current_file_path(&self) -> Option<PathBuf> {
        let a = self.active()?;
        let item = a.items.get(a.cursor.file)?;
        Some(a.set.absolute(&item.path))
    }

    /// Absolute path of the current file, when it is still there to open.
    pub fn open_target(&self) -> Option<PathBuf> {
        if !can_open(self) { return None; }
        self.current_file_path()
    }

    /// `[i/n]`, 1-based.
    pub fn group_label(&self) -> Option<String> {
        self.active().map(|a| format!("[{}/{}]", a.cursor.group + 1, a.set.len()))
    }

    /// `[j/m]`, 1-based.
    pub fn file_label(&self) -> Option<String> {
        self.active().map(|a| format!("[{}/{}]", a.cursor.file + 1, a.items.len()))
    }

    fn kind_of(&self, path: &str) -> MediaKind {
        classify(Path::new(path), &self.image_extensions, &self.video_extensions).unwrap_or(MediaKind::Image)
    }

    fn materialize(&self, set: &DuplicateSet, group_idx: usize) -> Vec<FileItem> {
        let Some(group) = set.get(group_idx) else { return Vec::new() };
        group.members.iter().map(|rel| {
            let kind = self.kind_of(rel);
            let preview = self.previews.load(&set.absolute(rel), kind);
            FileItem {
                path: rel.clone(),
                kind,
                keep: true,
                preview: preview.image,
                dims: preview.dims,
                duration: preview.duration,
            }
        }).collect()
    }

    // --- Operations ---

    pub fn start(&mut self, set: DuplicateSet) -> bool {
        if !can_start(self, Some(&set)) { return false; }
        let items = self.materialize(&set, 0);
        self.state = SessionState::Active(ActiveSession { set, cursor: Cursor { group: 0, file: 0 }, items });
        true
    }

    pub fn stop(&mut self) -> bool {
        if !can_stop(self) { return false; }
        self.state = SessionState::Idle;
        true
    }

    fn goto_group(&mut self, group_idx: usize) {
        let Some(a) = self.active() else { return };
        let items = self.materialize(&a.set, group_idx);
        if let Some(a) = self.active_mut() {
            a.cursor = Cursor { group: group_idx, file: 0 };
            a.items = items;
        }
    }

    pub fn next_group(&mut self) -> bool {
        if !can_next_group(self) { return false; }
        if let Some(c) = self.cursor() { self.goto_group(c.group + 1); }
        true
    }

    pub fn prev_group(&mut self) -> bool {
        if !can_prev_group(self) { return false; }
        if let Some(c) = self.cursor() { self.goto_group(c.group - 1); }
        true
    }

    pub fn next_image(&mut self) -> bool {
        if !can_next_image(self) { return false; }
        if let Some(a) = self.active_mut() { a.cursor.file += 1; }
        true
    }

    pub fn prev_image(&mut self) -> bool {
        if !can_prev_image(self) { return false; }
        if let Some(a) = self.active_mut() { a.cursor.file -= 1; }
        true
    }

    pub fn set_keep(&mut self, index: usize, keep: bool) -> bool {
        if !can_toggle_keep(self, index) { return false; }
        if let Some(a) = self.active_mut() { a.items[index].keep = keep; }
        true
    }

    pub fn toggle_keep(&mut self, index: usize) -> bool {
        let Some(keep) = self.items().get(index).map(|i| i.keep) else { return false };
        self.set_keep(index, !keep)
    }

    /// Removes every file of the current group marked delete from every group,
    /// then dispatches a background delete for each of them.
    ///
    /// The pruned state is built and swapped in before any request goes out,
    /// so a failure while building it leaves both disk and session untouched.
    pub fn delete_unselected(&mut self) -> Option<PendingDeletions> {
        if !can_delete(self) { return None; }
        let a = self.active()?;

        let removed: HashSet<String> = a.items.iter().filter(|i| !i.keep).map(|i| i.path.clone()).collect();
        let to_delete: Vec<PathBuf> = a.items.iter().filter(|i| !i.keep).map(|i| a.set.absolute(&i.path)).collect();
        let (set, new_idx) = reconcile(&a.set, &removed, a.cursor.group);

        let next_state = match new_idx {
            None => SessionState::Idle,
            Some(group) => {
                let items = self.materialize(&set, group);
                SessionState::Active(ActiveSession { set, cursor: Cursor { group, file: 0 }, items })
            }
        };
        self.state = next_state;
        if !self.is_active() {
            self.sink.info("No duplicate groups left");
        }

        let mut pending = PendingDeletions::default();
        for abs in to_delete {
            if abs.exists() {
                pending.receivers.push(spawn_delete(self.deleter.clone(), abs, self.retry, self.sink.clone()));
            } else {
                self.sink.warning(&format!("{} no longer exists, nothing to trash", abs.display()));
                pending.skipped.push(abs);
            }
        }
        Some(pending)
    }

    fn apply(&mut self, intent: SessionIntent) -> IntentOutcome {
        let done = |ok: bool| if ok { IntentOutcome::Done } else { IntentOutcome::Ignored };
        match intent {
            SessionIntent::NextGroup => done(self.next_group()),
            SessionIntent::PrevGroup => done(self.prev_group()),
            SessionIntent::NextImage => done(self.next_image()),
            SessionIntent::PrevImage => done(self.prev_image()),
            SessionIntent::ToggleKeep(i) => done(self.toggle_keep(i)),
            SessionIntent::SetKeep(i, keep) => done(self.set_keep(i, keep)),
            SessionIntent::Stop => done(self.stop()),
            SessionIntent::DeleteUnselected => match self.delete_unselected() {
                Some(pending) => IntentOutcome::Deleting(pending),
                None => IntentOutcome::Ignored,
            },
        }
    }

    /// Entry point for user actions. A panic inside an operation is logged and
    /// leaves the session as it was.
    pub fn handle_input(&mut self, intent: SessionIntent) -> IntentOutcome {
        let label = format!("{:?}", intent);
        match panic::catch_unwind(AssertUnwindSafe(|| self.apply(intent))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                self.sink.error(&format!("Unexpected failure in {}: {}", label, msg));
                IntentOutcome::Failed(msg)
            }
        }
    }
}
