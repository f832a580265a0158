//! Per-document auto-save session.
//!
//! `EditSession` ties the dirty tracker, the debounce scheduler and the
//! force-save guard to one injected [`Persister`]. The host feeds it edits
//! and calls [`EditSession::poll`] from its event loop; all time is passed
//! in explicitly.

use super::guard::ForceSaveGuard;
use super::persister::{Persister, SaveDispatch, SaveRequest, SaveTicket, SaveTrigger};
use super::scheduler::DebounceScheduler;
use super::tracker::DirtyTracker;
use super::AutoSaveConfig;
use crate::error::SaveError;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

fn next_session_id() -> u64 {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Outcomes
// ─────────────────────────────────────────────────────────────────────────────

/// Coarse save state, suitable for a status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Everything on disk
    Clean,
    /// Unsaved edits with nothing scheduled (auto-save off, or a save failed)
    Dirty,
    /// Unsaved edits with a debounce timer armed
    Debouncing,
    /// A save is in flight
    Saving,
}

/// What an edit did to the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    /// Debounce timer armed for the given deadline
    Scheduled(Instant),
    /// Force-save ceiling reached; a save was issued immediately
    Forced,
    /// A save is already in flight; the edit will be picked up when it completes
    Coalesced,
    /// Auto-save is disabled; the edit waits for a manual save
    Disabled,
}

/// Result of a save attempt, reported to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveEvent {
    Saved {
        request: SaveRequest,
        at: Instant,
        /// False when edits arrived while the write was in flight
        covered_all_edits: bool,
    },
    Failed {
        request: SaveRequest,
        error: SaveError,
    },
}

impl SaveEvent {
    pub fn request(&self) -> &SaveRequest {
        match self {
            SaveEvent::Saved { request, .. } | SaveEvent::Failed { request, .. } => request,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SaveEvent::Saved { .. })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Edit Session
// ─────────────────────────────────────────────────────────────────────────────

pub struct EditSession<P: Persister> {
    id: u64,
    config: AutoSaveConfig,
    tracker: DirtyTracker,
    scheduler: DebounceScheduler,
    guard: ForceSaveGuard,
    persister: P,
    in_flight: Option<SaveRequest>,
    /// A trigger arrived while `in_flight` was set
    resave_requested: bool,
    /// A manual save arrived while `in_flight` was set
    toast_requested: bool,
    next_sequence: u64,
    events: Vec<SaveEvent>,
}

impl<P: Persister> EditSession<P> {
    /// Start a session for a document just loaded at `now`.
    pub fn open(persister: P, config: AutoSaveConfig, now: Instant) -> Self {
        let id = next_session_id();
        debug!(
            "Opened edit session {} (debounce {:?}, ceiling {:?}, auto-save {})",
            id,
            config.debounce_delay,
            config.max_delay,
            if config.enabled { "on" } else { "off" }
        );
        Self {
            id,
            config,
            tracker: DirtyTracker::opened_at(now),
            scheduler: DebounceScheduler::new(config.debounce_delay),
            guard: ForceSaveGuard::new(config.max_delay),
            persister,
            in_flight: None,
            resave_requested: false,
            toast_requested: false,
            next_sequence: 0,
            events: Vec::new(),
        }
    }

    /// Re-initialise for a replacement document.
    ///
    /// The session gets a fresh id, so a completion for a save issued before
    /// the reset is ignored when it arrives.
    pub fn reset(&mut self, now: Instant) {
        self.scheduler.cancel();
        if let Some(request) = self.in_flight.take() {
            warn!(
                "Session {} reset while save #{} was in flight; its result will be ignored",
                self.id, request.ticket.sequence
            );
        }
        self.id = next_session_id();
        self.tracker = DirtyTracker::opened_at(now);
        self.resave_requested = false;
        self.toast_requested = false;
        self.events.clear();
        debug!("Session reset as {}", self.id);
    }

    /// Tear the session down and hand the persister back.
    ///
    /// The pending timer is dropped here, so nothing can save this document
    /// through the session afterwards.
    pub fn close(mut self) -> P {
        if let Some(timer) = self.scheduler.cancel() {
            debug!(
                "Session {} closed; cancelled auto-save timer {}",
                self.id,
                timer.id()
            );
        }
        if let Some(request) = self.in_flight.take() {
            warn!(
                "Session {} closed while save #{} was in flight",
                self.id, request.ticket.sequence
            );
        }
        if self.tracker.is_dirty() {
            warn!("Session {} closed with unsaved changes", self.id);
        }
        self.persister
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Edit Handling
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a content or frontmatter edit made at `now`.
    pub fn on_edit(&mut self, document: &P::Document, now: Instant) -> EditOutcome {
        let generation = self.tracker.mark_dirty();

        if !self.config.enabled {
            return EditOutcome::Disabled;
        }

        if let Some(request) = &self.in_flight {
            debug!(
                "Edit {} arrived while save #{} in flight; coalescing",
                generation, request.ticket.sequence
            );
            self.resave_requested = true;
            return EditOutcome::Coalesced;
        }

        if self.guard.should_force(&self.tracker, now) {
            info!(
                "Edits unsaved for over {:?}; forcing save",
                self.guard.max_delay()
            );
            self.scheduler.cancel();
            self.dispatch(document, now, SaveTrigger::Forced, false);
            return EditOutcome::Forced;
        }

        EditOutcome::Scheduled(self.scheduler.reschedule(now))
    }

    /// Drive timers and collect completed saves.
    ///
    /// Call from the host's event loop; returns every event produced since
    /// the previous call.
    pub fn poll(&mut self, document: &P::Document, now: Instant) -> Vec<SaveEvent> {
        for completion in self.persister.poll_completed() {
            self.complete(completion.ticket, completion.result, now);
        }

        if let Some(timer) = self.scheduler.take_expired(now) {
            if self.in_flight.is_some() {
                self.resave_requested = true;
            } else if self.tracker.is_dirty() && self.config.enabled {
                debug!("Debounce timer {} fired", timer.id());
                self.dispatch(document, now, SaveTrigger::Debounce, false);
            }
        }

        self.take_events()
    }

    /// Save immediately at the user's request.
    ///
    /// Returns `false` if there was nothing to save or a save is already in
    /// flight (in which case the request is folded into that save).
    pub fn save_now(&mut self, document: &P::Document, now: Instant) -> bool {
        if !self.tracker.is_dirty() {
            return false;
        }
        if self.in_flight.is_some() {
            self.resave_requested = true;
            self.toast_requested = true;
            return false;
        }
        self.scheduler.cancel();
        self.dispatch(document, now, SaveTrigger::Manual, true);
        true
    }

    /// Events produced outside of `poll` (forced or manual saves).
    pub fn take_events(&mut self) -> Vec<SaveEvent> {
        std::mem::take(&mut self.events)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Save Plumbing
    // ─────────────────────────────────────────────────────────────────────────

    fn dispatch(
        &mut self,
        document: &P::Document,
        now: Instant,
        trigger: SaveTrigger,
        show_toast: bool,
    ) {
        self.next_sequence += 1;
        let request = SaveRequest {
            ticket: SaveTicket {
                session: self.id,
                sequence: self.next_sequence,
                generation: self.tracker.generation(),
            },
            trigger,
            show_toast: show_toast || std::mem::take(&mut self.toast_requested),
        };
        debug!(
            "Session {} issuing {} #{} at generation {}",
            self.id,
            trigger.label(),
            request.ticket.sequence,
            request.ticket.generation
        );

        self.in_flight = Some(request);
        self.resave_requested = false;

        match self.persister.save(document, request) {
            SaveDispatch::Completed(result) => self.complete(request.ticket, result, now),
            SaveDispatch::Pending => {}
        }
    }

    fn complete(&mut self, ticket: SaveTicket, result: Result<(), SaveError>, now: Instant) {
        let mut request = match self.in_flight {
            Some(request) if request.ticket == ticket => request,
            _ => {
                debug!("Ignoring stale save completion {:?}", ticket);
                return;
            }
        };
        self.in_flight = None;
        let resave = std::mem::take(&mut self.resave_requested);

        match result {
            Ok(()) => {
                let covered_all_edits = self.tracker.generation() == ticket.generation;
                if covered_all_edits {
                    // The manual save folded into this one is satisfied
                    if std::mem::take(&mut self.toast_requested) {
                        request.show_toast = true;
                    }
                    self.tracker.mark_clean(now);
                    self.scheduler.cancel();
                    info!("{} #{} completed", request.trigger.label(), ticket.sequence);
                } else {
                    // Disk now holds an older snapshot; keep the newer edits scheduled
                    self.tracker.record_partial_save(now);
                    if self.config.enabled {
                        self.scheduler.reschedule(now);
                    }
                    debug!(
                        "{} #{} completed behind newer edits (generation {} < {})",
                        request.trigger.label(),
                        ticket.sequence,
                        ticket.generation,
                        self.tracker.generation()
                    );
                }
                self.events.push(SaveEvent::Saved {
                    request,
                    at: now,
                    covered_all_edits,
                });
            }
            Err(error) => {
                warn!(
                    "{} #{} failed: {}",
                    request.trigger.label(),
                    ticket.sequence,
                    error
                );
                self.toast_requested = false;
                // Edits made during the failed write still expect a save
                if resave && self.config.enabled {
                    self.scheduler.reschedule(now);
                }
                self.events.push(SaveEvent::Failed { request, error });
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration & Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply changed settings. An armed timer keeps its current deadline.
    pub fn set_config(&mut self, config: AutoSaveConfig) {
        self.scheduler.set_delay(config.debounce_delay);
        self.guard.set_max_delay(config.max_delay);
        if !config.enabled {
            self.scheduler.cancel();
        }
        self.config = config;
    }

    pub fn config(&self) -> &AutoSaveConfig {
        &self.config
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_dirty(&self) -> bool {
        self.tracker.is_dirty()
    }

    pub fn last_save(&self) -> Option<Instant> {
        self.tracker.last_save()
    }

    pub fn generation(&self) -> u64 {
        self.tracker.generation()
    }

    pub fn is_saving(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn state(&self) -> SessionState {
        if self.in_flight.is_some() {
            SessionState::Saving
        } else if !self.tracker.is_dirty() {
            SessionState::Clean
        } else if self.scheduler.is_armed() {
            SessionState::Debouncing
        } else {
            SessionState::Dirty
        }
    }

    /// Deadline of the armed debounce timer, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.deadline()
    }

    pub fn time_until_next(&self, now: Instant) -> Option<Duration> {
        self.scheduler.time_until_fire(now)
    }

    pub fn persister(&self) -> &P {
        &self.persister
    }

    pub fn persister_mut(&mut self) -> &mut P {
        &mut self.persister
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autosave::{SaveCompletion, DEFAULT_DEBOUNCE_DELAY};

    /// Persister that records every request and can fail or defer on demand.
    #[derive(Default)]
    struct RecordingPersister {
        saved: Vec<(String, SaveRequest)>,
        fail_next: bool,
        deferred: bool,
        completions: Vec<SaveCompletion>,
    }

    impl Persister for RecordingPersister {
        type Document = str;

        fn save(&mut self, document: &str, request: SaveRequest) -> SaveDispatch {
            self.saved.push((document.to_string(), request));
            if self.deferred {
                return SaveDispatch::Pending;
            }
            if self.fail_next {
                self.fail_next = false;
                return SaveDispatch::Completed(Err(SaveError::new("disk full")));
            }
            SaveDispatch::Completed(Ok(()))
        }

        fn poll_completed(&mut self) -> Vec<SaveCompletion> {
            std::mem::take(&mut self.completions)
        }
    }

    fn config() -> AutoSaveConfig {
        AutoSaveConfig {
            enabled: true,
            debounce_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        }
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn open(t0: Instant) -> EditSession<RecordingPersister> {
        EditSession::open(RecordingPersister::default(), config(), t0)
    }

    #[test]
    fn test_single_edit_saves_after_debounce() {
        let t0 = Instant::now();
        let mut session = open(t0);

        let outcome = session.on_edit("a", t0 + ms(1000));
        assert_eq!(outcome, EditOutcome::Scheduled(t0 + ms(3000)));
        assert_eq!(session.state(), SessionState::Debouncing);

        assert!(session.poll("a", t0 + ms(2999)).is_empty());
        assert!(session.persister().saved.is_empty());

        let events = session.poll("a", t0 + ms(3000));
        assert_eq!(events.len(), 1);
        let (content, request) = &session.persister().saved[0];
        assert_eq!(content, "a");
        assert_eq!(request.trigger, SaveTrigger::Debounce);
        assert!(!request.show_toast);

        assert!(!session.is_dirty());
        assert_eq!(session.last_save(), Some(t0 + ms(3000)));
        assert_eq!(session.state(), SessionState::Clean);
    }

    #[test]
    fn test_burst_of_edits_coalesces_into_one_save() {
        let t0 = Instant::now();
        let mut session = open(t0);

        for (i, offset) in [0, 500, 1000, 1500].into_iter().enumerate() {
            session.on_edit("draft", t0 + ms(offset));
            assert!(session.poll("draft", t0 + ms(offset)).is_empty(), "edit {}", i);
        }

        assert!(session.poll("draft", t0 + ms(3499)).is_empty());
        assert_eq!(session.poll("draft", t0 + ms(3500)).len(), 1);
        assert!(session.poll("draft", t0 + ms(10_000)).is_empty());
        assert_eq!(session.persister().saved.len(), 1);
    }

    #[test]
    fn test_force_save_after_ceiling() {
        let t0 = Instant::now();
        let mut session = open(t0);

        session.on_edit("v1", t0 + ms(1000));
        let outcome = session.on_edit("v2", t0 + ms(11_000));

        assert_eq!(outcome, EditOutcome::Forced);
        let saved = &session.persister().saved;
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].0, "v2");
        assert_eq!(saved[0].1.trigger, SaveTrigger::Forced);
        assert!(!saved[0].1.show_toast);

        // No debounce left behind
        assert_eq!(session.next_deadline(), None);
        assert!(!session.is_dirty());
        assert_eq!(session.last_save(), Some(t0 + ms(11_000)));

        let events = session.take_events();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_success());
    }

    #[test]
    fn test_clean_document_edit_within_ceiling_debounces() {
        let t0 = Instant::now();
        let mut session = open(t0);

        let outcome = session.on_edit("x", t0 + ms(3000));
        assert_eq!(outcome, EditOutcome::Scheduled(t0 + ms(5000)));
        assert!(session.persister().saved.is_empty());
    }

    #[test]
    fn test_continuous_typing_is_bounded_by_ceiling() {
        let t0 = Instant::now();
        let mut session = open(t0);

        let mut forced_at = None;
        for step in 1..=30u64 {
            let now = t0 + ms(step * 500);
            if session.on_edit("typing", now) == EditOutcome::Forced {
                forced_at = Some(now);
                break;
            }
            assert!(session.poll("typing", now).is_empty());
        }

        assert_eq!(forced_at, Some(t0 + ms(10_000)));
    }

    #[test]
    fn test_failed_save_stays_dirty() {
        let t0 = Instant::now();
        let mut session = open(t0);
        session.persister_mut().fail_next = true;

        session.on_edit("a", t0 + ms(1000));
        let events = session.poll("a", t0 + ms(3000));

        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            SaveEvent::Failed { error, .. } if error.message() == "disk full"
        ));
        assert!(session.is_dirty());
        assert_eq!(session.last_save(), Some(t0));
        assert_eq!(session.state(), SessionState::Dirty);

        // Next edit measures the ceiling against the unchanged timestamp
        let outcome = session.on_edit("ab", t0 + ms(10_500));
        assert_eq!(outcome, EditOutcome::Forced);
        assert!(!session.is_dirty());
    }

    #[test]
    fn test_close_with_pending_timer_never_saves() {
        let t0 = Instant::now();
        let mut session = open(t0);
        session.on_edit("unsaved", t0 + ms(100));
        assert!(session.next_deadline().is_some());

        let persister = session.close();
        assert!(persister.saved.is_empty());
    }

    #[test]
    fn test_manual_save_shows_toast_and_cancels_timer() {
        let t0 = Instant::now();
        let mut session = open(t0);

        assert!(!session.save_now("clean", t0));

        session.on_edit("edited", t0 + ms(500));
        assert!(session.save_now("edited", t0 + ms(600)));

        let (_, request) = &session.persister().saved[0];
        assert_eq!(request.trigger, SaveTrigger::Manual);
        assert!(request.show_toast);
        assert_eq!(session.next_deadline(), None);
        assert_eq!(session.take_events().len(), 1);
        assert!(session.poll("edited", t0 + ms(5000)).is_empty());
        assert_eq!(session.persister().saved.len(), 1);
    }

    #[test]
    fn test_disabled_auto_save_waits_for_manual_save() {
        let t0 = Instant::now();
        let mut session = EditSession::open(
            RecordingPersister::default(),
            AutoSaveConfig {
                enabled: false,
                ..config()
            },
            t0,
        );

        assert_eq!(session.on_edit("a", t0 + ms(20_000)), EditOutcome::Disabled);
        assert!(session.poll("a", t0 + ms(60_000)).is_empty());
        assert!(session.is_dirty());
        assert!(session.save_now("a", t0 + ms(60_000)));
        assert!(!session.is_dirty());
    }

    #[test]
    fn test_disabling_cancels_pending_timer() {
        let t0 = Instant::now();
        let mut session = open(t0);
        session.on_edit("a", t0);
        session.set_config(AutoSaveConfig {
            enabled: false,
            ..config()
        });
        assert_eq!(session.next_deadline(), None);
        assert!(session.poll("a", t0 + ms(5000)).is_empty());
    }

    #[test]
    fn test_in_flight_save_coalesces_triggers() {
        let t0 = Instant::now();
        let mut session = open(t0);
        session.persister_mut().deferred = true;

        session.on_edit("v1", t0 + ms(1000));
        assert!(session.poll("v1", t0 + ms(3000)).is_empty());
        assert_eq!(session.state(), SessionState::Saving);

        // Edit and manual save while the write is outstanding
        assert_eq!(session.on_edit("v2", t0 + ms(3500)), EditOutcome::Coalesced);
        assert!(!session.save_now("v2", t0 + ms(3600)));
        assert!(session.poll("v2", t0 + ms(20_000)).is_empty());
        assert_eq!(session.persister().saved.len(), 1);

        // First write lands; it covered generation 1 only
        let ticket = session.persister().saved[0].1.ticket;
        session.persister_mut().completions.push(SaveCompletion {
            ticket,
            result: Ok(()),
        });
        let events = session.poll("v2", t0 + ms(21_000));
        assert!(matches!(
            events[0],
            SaveEvent::Saved {
                covered_all_edits: false,
                ..
            }
        ));
        assert!(session.is_dirty());
        assert_eq!(session.last_save(), Some(t0 + ms(21_000)));
        assert_eq!(session.next_deadline(), Some(t0 + ms(23_000)));

        // Re-armed debounce picks up the newer edit
        session.poll("v2", t0 + ms(23_000));
        assert_eq!(session.persister().saved.len(), 2);
        assert_eq!(session.persister().saved[1].0, "v2");
    }

    #[test]
    fn test_stale_completion_after_reset_is_ignored() {
        let t0 = Instant::now();
        let mut session = open(t0);
        session.persister_mut().deferred = true;

        session.on_edit("old", t0);
        session.poll("old", t0 + ms(2000));
        let stale = session.persister().saved[0].1.ticket;

        session.reset(t0 + ms(2100));
        assert_ne!(session.id(), stale.session);

        session.persister_mut().completions.push(SaveCompletion {
            ticket: stale,
            result: Err(SaveError::new("late")),
        });
        assert!(session.poll("new", t0 + ms(2200)).is_empty());
        assert_eq!(session.state(), SessionState::Clean);
    }

    #[test]
    fn test_deferred_failure_with_newer_edits_rearms() {
        let t0 = Instant::now();
        let mut session = open(t0);
        session.persister_mut().deferred = true;

        session.on_edit("v1", t0);
        session.poll("v1", t0 + ms(2000));
        session.on_edit("v2", t0 + ms(2500));

        let ticket = session.persister().saved[0].1.ticket;
        session.persister_mut().completions.push(SaveCompletion {
            ticket,
            result: Err(SaveError::new("network drive gone")),
        });
        let events = session.poll("v2", t0 + ms(3000));
        assert!(!events[0].is_success());
        assert_eq!(session.last_save(), Some(t0));
        assert_eq!(session.next_deadline(), Some(t0 + ms(5000)));
    }

    #[test]
    fn test_oversized_delays_do_not_panic() {
        let t0 = Instant::now();
        let mut session = EditSession::open(
            RecordingPersister::default(),
            AutoSaveConfig {
                enabled: true,
                debounce_delay: Duration::MAX,
                max_delay: Duration::MAX,
            },
            t0,
        );

        assert_eq!(
            session.on_edit("x", t0),
            EditOutcome::Scheduled(t0 + DEFAULT_DEBOUNCE_DELAY)
        );
        assert_eq!(session.poll("x", t0 + DEFAULT_DEBOUNCE_DELAY).len(), 1);
        assert!(!session.is_dirty());
    }

    #[test]
    fn test_manual_save_during_in_flight_save_is_confirmed() {
        let t0 = Instant::now();
        let mut session = open(t0);
        session.persister_mut().deferred = true;

        session.on_edit("v1", t0);
        session.poll("v1", t0 + ms(2000));
        assert!(!session.persister().saved[0].1.show_toast);

        // Nothing new to write, but the user still asked for a save
        assert!(!session.save_now("v1", t0 + ms(2100)));

        let ticket = session.persister().saved[0].1.ticket;
        session.persister_mut().completions.push(SaveCompletion {
            ticket,
            result: Ok(()),
        });
        let events = session.poll("v1", t0 + ms(2200));
        assert_eq!(events.len(), 1);
        assert!(events[0].is_success());
        assert!(events[0].request().show_toast);
        assert!(!session.is_dirty());
        assert_eq!(session.persister().saved.len(), 1);
    }

    #[test]
    fn test_manual_save_behind_newer_edits_confirms_follow_up() {
        let t0 = Instant::now();
        let mut session = open(t0);
        session.persister_mut().deferred = true;

        session.on_edit("v1", t0);
        session.poll("v1", t0 + ms(2000));
        session.on_edit("v2", t0 + ms(2100));
        assert!(!session.save_now("v2", t0 + ms(2200)));

        let ticket = session.persister().saved[0].1.ticket;
        session.persister_mut().completions.push(SaveCompletion {
            ticket,
            result: Ok(()),
        });
        let events = session.poll("v2", t0 + ms(2300));
        assert!(!events[0].request().show_toast);

        session.poll("v2", t0 + ms(4300));
        let (text, request) = &session.persister().saved[1];
        assert_eq!(text, "v2");
        assert!(request.show_toast);
    }
}
