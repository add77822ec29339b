//! The active code registry: every attendance code that can currently be
//! redeemed, keyed by the code itself.
//!
//! # Concurrency note
//!
//! `CodeRegistry` is a plain `HashMap` behind `&mut self`, in the same
//! spirit as a single-owner manager: the attendance service wraps it in
//! one `tokio::sync::Mutex` ([`SharedRegistry`](crate::SharedRegistry)),
//! so `try_register`'s check-then-insert runs as one step under that lock.
//!
//! Entries are handed out as `Arc<ActiveCode>`. A redemption keeps its
//! `Arc` after the registry lock is released, so a sweep or a close that
//! removes the code from the map never pulls an entry out from under an
//! in-flight redemption. The per-entry redemption sets have their own
//! lock, which keeps two students redeeming the same code from
//! serializing on the whole registry.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rollcall_protocol::{ClassSession, Coordinates, UserId};
use tokio::time::Instant;

use crate::CodeError;

// ---------------------------------------------------------------------------
// NewCode
// ---------------------------------------------------------------------------

/// Everything a teacher supplies when asking for a code.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCode {
    pub teacher_id: UserId,
    pub session: ClassSession,
    /// Center of the geofence. `None` means the code works anywhere.
    pub geofence: Option<Coordinates>,
}

// ---------------------------------------------------------------------------
// ActiveCode
// ---------------------------------------------------------------------------

/// Result of claiming a redemption for a student.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redemption {
    /// The student is now pending on this code. Follow up with
    /// [`ActiveCode::confirm_redemption`] or [`ActiveCode::abandon_redemption`].
    Claimed,
    /// Another redemption by the same student has not finished yet.
    InProgress,
    /// The student already redeemed this code; nothing changed.
    AlreadyRedeemed,
}

/// Students seen on one code. A student is in at most one of the two sets.
#[derive(Debug, Default)]
struct Redemptions {
    confirmed: HashSet<UserId>,
    pending: HashSet<UserId>,
}

/// One live attendance code and its session metadata.
///
/// Immutable except for the redemption sets. A student moves from
/// pending to confirmed once, or leaves pending again when marking them
/// present failed.
#[derive(Debug)]
pub struct ActiveCode {
    code: String,
    teacher_id: UserId,
    session: ClassSession,
    geofence: Option<Coordinates>,
    created_at: Instant,
    expires_at: Instant,
    redemptions: Mutex<Redemptions>,
}

impl ActiveCode {
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn teacher_id(&self) -> &UserId {
        &self.teacher_id
    }

    pub fn session(&self) -> &ClassSession {
        &self.session
    }

    pub fn geofence(&self) -> Option<Coordinates> {
        self.geofence
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// `true` while `now < expires_at`.
    pub fn is_active_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    /// Time left before the code expires (zero once expired).
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Claims a redemption of this code for `student`.
    ///
    /// Check-and-insert under the entry's own lock, so concurrent
    /// redemptions by different students never lose an update and a
    /// second attempt by the same student sees the first one, whether it
    /// finished or is still waiting on the attendance book.
    pub fn begin_redemption(&self, student: &UserId) -> Redemption {
        let mut redemptions = self.redemptions();
        if redemptions.confirmed.contains(student) {
            Redemption::AlreadyRedeemed
        } else if redemptions.pending.insert(student.clone()) {
            Redemption::Claimed
        } else {
            Redemption::InProgress
        }
    }

    /// Moves a claimed redemption to confirmed. Returns `false` if
    /// `student` had no pending claim.
    pub fn confirm_redemption(&self, student: &UserId) -> bool {
        let mut redemptions = self.redemptions();
        if !redemptions.pending.remove(student) {
            return false;
        }
        redemptions.confirmed.insert(student.clone());
        true
    }

    /// Drops a claimed redemption so the student can try again.
    pub fn abandon_redemption(&self, student: &UserId) -> bool {
        self.redemptions().pending.remove(student)
    }

    pub fn has_redeemed(&self, student: &UserId) -> bool {
        self.redemptions().confirmed.contains(student)
    }

    pub fn redemption_count(&self) -> usize {
        self.redemptions().confirmed.len()
    }

    /// Snapshot of every student who redeemed this code, sorted.
    pub fn redeemed_by(&self) -> Vec<UserId> {
        let mut students: Vec<UserId> = self.redemptions().confirmed.iter().cloned().collect();
        students.sort();
        students
    }

    // Every critical section leaves both sets consistent before it can
    // panic, so a poisoned lock is still safe to use.
    fn redemptions(&self) -> MutexGuard<'_, Redemptions> {
        self.redemptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// CodeRegistry
// ---------------------------------------------------------------------------

/// All attendance codes that are currently live.
///
/// ## Lifecycle
///
/// ```text
/// try_register() ──→ [live] ──→ lookup() ──→ ActiveCode::begin_redemption()
///                      │
///                      ├──(now ≥ expires_at)──→ [expired] ──→ sweep_expired()
///                      │                          (invisible to lookup)
///                      └──(revoke)──→ removed
/// ```
#[derive(Debug)]
pub struct CodeRegistry {
    /// Live (and expired-but-not-yet-swept) codes, keyed by code value.
    codes: HashMap<String, Arc<ActiveCode>>,

    /// Lifetime of every new code.
    ttl: Duration,
}

impl CodeRegistry {
    /// Creates an empty registry whose codes live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            codes: HashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Registers `code` for `request` if no live code has the same value.
    ///
    /// An expired entry that the sweeper hasn't removed yet doesn't block
    /// the value; it is replaced.
    ///
    /// # Errors
    /// - [`CodeError::Collision`] if a live code already uses the value.
    /// - [`CodeError::InvalidCoordinates`] if the geofence center is not a
    ///   valid point. Nothing is inserted.
    pub fn try_register(
        &mut self,
        code: String,
        request: &NewCode,
    ) -> Result<Arc<ActiveCode>, CodeError> {
        if let Some(center) = request.geofence.filter(|c| !c.is_valid()) {
            return Err(CodeError::InvalidCoordinates(center));
        }

        let now = Instant::now();
        if let Some(existing) = self.codes.get(&code) {
            if existing.is_active_at(now) {
                return Err(CodeError::Collision(code));
            }
        }

        let entry = Arc::new(ActiveCode {
            code: code.clone(),
            teacher_id: request.teacher_id.clone(),
            session: request.session.clone(),
            geofence: request.geofence,
            created_at: now,
            expires_at: now + self.ttl,
            redemptions: Mutex::new(Redemptions::default()),
        });
        self.codes.insert(code, Arc::clone(&entry));

        tracing::debug!(
            code = %entry.code,
            teacher_id = %entry.teacher_id,
            geofenced = entry.geofence.is_some(),
            "attendance code registered"
        );
        Ok(entry)
    }

    /// Returns the live entry for `code`, or `None` if there is none or
    /// it has expired.
    pub fn lookup(&self, code: &str) -> Option<Arc<ActiveCode>> {
        let now = Instant::now();
        self.codes
            .get(code)
            .filter(|entry| entry.is_active_at(now))
            .cloned()
    }

    /// Number of live codes. Expired entries awaiting a sweep don't count.
    pub fn count(&self) -> usize {
        let now = Instant::now();
        self.codes
            .values()
            .filter(|entry| entry.is_active_at(now))
            .count()
    }

    /// `true` if at least one code is live. Stops at the first one.
    pub fn has_live(&self) -> bool {
        let now = Instant::now();
        self.codes.values().any(|entry| entry.is_active_at(now))
    }

    /// Live codes issued by `teacher_id`, oldest first.
    pub fn issued_by(&self, teacher_id: &UserId) -> Vec<Arc<ActiveCode>> {
        let now = Instant::now();
        let mut codes: Vec<Arc<ActiveCode>> = self
            .codes
            .values()
            .filter(|entry| entry.is_active_at(now) && entry.teacher_id == *teacher_id)
            .cloned()
            .collect();
        codes.sort_by_key(|entry| entry.created_at);
        codes
    }

    /// Closes a live code early. Only the teacher who issued it may.
    ///
    /// # Errors
    /// - [`CodeError::NotFound`] if no live code has this value.
    /// - [`CodeError::NotIssuer`] if `teacher_id` didn't issue it; the
    ///   code stays live.
    pub fn revoke(
        &mut self,
        code: &str,
        teacher_id: &UserId,
    ) -> Result<Arc<ActiveCode>, CodeError> {
        let entry = self
            .lookup(code)
            .ok_or_else(|| CodeError::NotFound(code.to_string()))?;

        if entry.teacher_id != *teacher_id {
            return Err(CodeError::NotIssuer {
                code: code.to_string(),
                teacher_id: teacher_id.clone(),
            });
        }

        self.codes.remove(code);
        tracing::info!(%code, %teacher_id, "attendance code closed");
        Ok(entry)
    }

    /// Drops `entry` if it is still the one stored under its code.
    /// Used to undo a registration whose roster preparation failed.
    /// Returns `false` if the slot now holds a different entry or nothing.
    pub fn discard(&mut self, entry: &Arc<ActiveCode>) -> bool {
        let same = self
            .codes
            .get(entry.code())
            .is_some_and(|stored| Arc::ptr_eq(stored, entry));
        if same {
            self.codes.remove(entry.code());
        }
        same
    }

    /// Removes every expired entry and returns their codes.
    pub fn sweep_expired(&mut self) -> Vec<String> {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.codes.retain(|code, entry| {
            if entry.is_active_at(now) {
                true
            } else {
                expired.push(code.clone());
                false
            }
        });
        expired
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// `true` if nothing is stored at all.
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

// =========================================================================
// Tests
// =========================================================================
