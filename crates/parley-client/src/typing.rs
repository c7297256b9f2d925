//! Typing notifications in both directions.
//!
//! Both halves are plain state machines driven by explicit instants, so the
//! session decides when time passes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parley_shared::types::{SenderRole, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingAction {
    Start(UserId),
    Stop(UserId),
}

#[derive(Debug, Clone)]
struct ActiveTyping {
    receiver: UserId,
    last_emit: Instant,
    last_key: Instant,
}

/// Outgoing side: turns keystrokes into `typing` / `stopTyping` emissions.
#[derive(Debug, Clone)]
pub struct TypingEmitter {
    idle: Duration,
    renew: Duration,
    active: Option<ActiveTyping>,
}

impl TypingEmitter {
    pub fn new(idle: Duration, renew: Duration) -> Self {
        Self {
            idle,
            renew,
            active: None,
        }
    }

    pub fn keystroke(&mut self, receiver: &UserId, now: Instant) -> Vec<TypingAction> {
        let mut actions = Vec::new();

        if let Some(active) = self.active.as_mut().filter(|a| &a.receiver == receiver) {
            active.last_key = now;
            if now.saturating_duration_since(active.last_emit) >= self.renew {
                active.last_emit = now;
                actions.push(TypingAction::Start(receiver.clone()));
            }
            return actions;
        }

        if let Some(previous) = self.active.take() {
            actions.push(TypingAction::Stop(previous.receiver));
        }
        self.active = Some(ActiveTyping {
            receiver: receiver.clone(),
            last_emit: now,
            last_key: now,
        });
        actions.push(TypingAction::Start(receiver.clone()));
        actions
    }

    /// Emit `stopTyping` once the idle window has passed.
    pub fn tick(&mut self, now: Instant) -> Option<TypingAction> {
        let expired = self
            .active
            .as_ref()
            .is_some_and(|a| now.saturating_duration_since(a.last_key) >= self.idle);
        if expired {
            self.active
                .take()
                .map(|a| TypingAction::Stop(a.receiver))
        } else {
            None
        }
    }

    /// Sending a message ends typing right away.
    pub fn on_send(&mut self) -> Option<TypingAction> {
        self.active.take().map(|a| TypingAction::Stop(a.receiver))
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.active.as_ref().map(|a| a.last_key + self.idle)
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }
}

/// Incoming side: who is typing to us right now.
#[derive(Debug, Clone)]
pub struct TypingIndicator {
    expiry: Duration,
    typing: HashMap<UserId, (SenderRole, Instant)>,
}

impl TypingIndicator {
    pub fn new(expiry: Duration) -> Self {
        Self {
            expiry,
            typing: HashMap::new(),
        }
    }

    pub fn on_typing(&mut self, sender: UserId, role: SenderRole, now: Instant) {
        self.typing.insert(sender, (role, now));
    }

    /// Returns whether an indicator was showing.
    pub fn on_stop(&mut self, sender: &UserId) -> bool {
        self.typing.remove(sender).is_some()
    }

    pub fn typing_role(&self, sender: &UserId, now: Instant) -> Option<SenderRole> {
        self.typing
            .get(sender)
            .filter(|(_, seen)| now.saturating_duration_since(*seen) < self.expiry)
            .map(|(role, _)| *role)
    }

    /// Drop indicators that were not renewed in time.
    pub fn expire(&mut self, now: Instant) -> Vec<(UserId, SenderRole)> {
        let expiry = self.expiry;
        let stale: Vec<UserId> = self
            .typing
            .iter()
            .filter(|(_, (_, seen))| now.saturating_duration_since(*seen) >= expiry)
            .map(|(user, _)| user.clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|user| self.typing.remove(&user).map(|(role, _)| (user, role)))
            .collect()
    }

    pub fn next_expiry(&self) -> Option<Instant> {
        self.typing.values().map(|(_, seen)| *seen + self.expiry).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    fn emitter() -> TypingEmitter {
        TypingEmitter::new(Duration::from_millis(1_000), Duration::from_millis(2_000))
    }

    #[test]
    fn continuous_typing_then_pause_stops_once() {
        let bob = user("bob");
        let mut emitter = emitter();
        let t0 = Instant::now();
        let mut emitted = Vec::new();

        // Keys every 200ms for one second.
        for step in 0..=5 {
            let now = t0 + Duration::from_millis(step * 200);
            emitted.extend(emitter.keystroke(&bob, now));
            emitted.extend(emitter.tick(now));
        }
        let last_key = t0 + Duration::from_millis(1_000);

        // 1.5s pause, polled every 100ms.
        let mut stopped_at = None;
        for step in 1..=15 {
            let now = last_key + Duration::from_millis(step * 100);
            if let Some(action) = emitter.tick(now) {
                stopped_at.get_or_insert(now);
                emitted.push(action);
            }
        }

        assert_eq!(
            emitted,
            vec![TypingAction::Start(bob.clone()), TypingAction::Stop(bob)]
        );
        assert_eq!(stopped_at, Some(last_key + Duration::from_millis(1_000)));
    }

    #[test]
    fn long_typing_renews() {
        let bob = user("bob");
        let mut emitter = emitter();
        let t0 = Instant::now();
        let starts = (0..=25)
            .flat_map(|step| emitter.keystroke(&bob, t0 + Duration::from_millis(step * 200)))
            .filter(|a| matches!(a, TypingAction::Start(_)))
            .count();
        // t = 0, 2.0s, 4.0s
        assert_eq!(starts, 3);
    }

    #[test]
    fn switching_receiver_stops_previous() {
        let mut emitter = emitter();
        let now = Instant::now();
        emitter.keystroke(&user("bob"), now);
        let actions = emitter.keystroke(&user("carol"), now);
        assert_eq!(
            actions,
            vec![
                TypingAction::Stop(user("bob")),
                TypingAction::Start(user("carol"))
            ]
        );
    }

    #[test]
    fn send_stops_typing() {
        let mut emitter = emitter();
        let now = Instant::now();
        emitter.keystroke(&user("bob"), now);
        assert_eq!(emitter.deadline(), Some(now + Duration::from_secs(1)));
        assert_eq!(emitter.on_send(), Some(TypingAction::Stop(user("bob"))));
        assert!(!emitter.is_active());
        assert_eq!(emitter.tick(now + Duration::from_secs(5)), None);
    }

    #[test]
    fn indicator_expires() {
        let mut indicator = TypingIndicator::new(Duration::from_secs(5));
        let now = Instant::now();
        indicator.on_typing(user("lawyer-1"), SenderRole::Lawyer, now);

        assert_eq!(
            indicator.typing_role(&user("lawyer-1"), now),
            Some(SenderRole::Lawyer)
        );
        assert!(indicator.expire(now + Duration::from_secs(1)).is_empty());

        let expired = indicator.expire(now + Duration::from_secs(5));
        assert_eq!(expired, vec![(user("lawyer-1"), SenderRole::Lawyer)]);
        assert!(indicator.next_expiry().is_none());
    }

    #[test]
    fn stop_clears_indicator() {
        let mut indicator = TypingIndicator::new(Duration::from_secs(5));
        let now = Instant::now();
        indicator.on_typing(user("client-9"), SenderRole::User, now);
        assert!(indicator.on_stop(&user("client-9")));
        assert!(!indicator.on_stop(&user("client-9")));
        assert_eq!(indicator.typing_role(&user("client-9"), now), None);
    }
}
