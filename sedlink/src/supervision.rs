//! Child supervision.
//!
//! A sleepy child cannot tell a quiet parent from a lost one. The parent
//! side runs a [`ChildSupervisor`] that guarantees every sleepy child a
//! frame at least once per its supervision interval; the child side runs a
//! [`SupervisionListener`] that treats a long enough silence as loss of the
//! parent and asks MLE to recover.

use crate::message::{Message, MessageKind, SendQueue};
use crate::neighbors::{Neighbor, NeighborTable};
use crate::notifier::Events;
use crate::time::{Duration, Instant};
use crate::timer::Timer;
use crate::traits::Mle;
use crate::{config, info, warn};
use sedlink_frame::Address;

/// Parent-side keep-alive emitter.
///
/// Ticks once per supervision unit. On every tick each valid, sleepy,
/// supervised child accrues one unit; a child that reaches its interval
/// without downlink traffic gets a supervision message queued, unless it
/// already has indirect traffic pending (which satisfies liveness just as
/// well).
#[derive(Debug, Default)]
pub struct ChildSupervisor {
    timer: Timer,
}

impl ChildSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the child's supervision accrual; called from every downlink
    /// emission path.
    pub fn update_on_send(&self, child: &mut Neighbor) {
        child.reset_units_since_last_supervision();
    }

    /// Resolve the destination child of a supervision message from the
    /// child index it buffers.
    pub fn get_destination<'a, const N: usize>(
        message: &Message,
        neighbors: &'a NeighborTable<N>,
    ) -> Option<&'a Neighbor> {
        if message.kind() != MessageKind::Supervision {
            return None;
        }
        neighbors.get(*message.data().first()?)
    }

    /// One supervision unit of wall time. Under an attached CSL peripheral
    /// the unit shrinks to 100 ms; such a central has no other children, so
    /// the interval units change globally.
    fn tick_period(mle: &impl Mle) -> Duration {
        if mle.is_csl_peripheral_present() {
            config::SUPERVISION_TICK_PERIOD_WOR
        } else {
            config::SUPERVISION_TICK_PERIOD
        }
    }

    /// Start the timer iff MLE is running and a valid child exists; stop it
    /// otherwise. Idempotent.
    pub fn check_state<const N: usize>(
        &mut self,
        now: Instant,
        mle: &impl Mle,
        neighbors: &NeighborTable<N>,
    ) {
        let should_run = !mle.is_disabled() && neighbors.has_valid_children();

        if should_run && !self.timer.is_running() {
            self.timer.start(now, Self::tick_period(mle));
            info!("starting child supervision");
        }

        if !should_run && self.timer.is_running() {
            self.timer.stop();
            info!("stopping child supervision");
        }
    }

    pub fn handle_notifier_events<const N: usize>(
        &mut self,
        events: Events,
        now: Instant,
        mle: &impl Mle,
        neighbors: &NeighborTable<N>,
    ) {
        if events.intersects(Events::ROLE_CHANGED | Events::CHILD_ADDED | Events::CHILD_REMOVED) {
            self.check_state(now, mle, neighbors);
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_running()
    }

    pub fn poll_at(&self) -> Option<Instant> {
        self.timer.fire_time()
    }

    pub fn poll<const N: usize, const Q: usize>(
        &mut self,
        now: Instant,
        mle: &impl Mle,
        neighbors: &mut NeighborTable<N>,
        queue: &mut SendQueue<Q>,
    ) {
        if self.timer.poll(now) {
            self.handle_timer(now, mle, neighbors, queue);
        }
    }

    fn handle_timer<const N: usize, const Q: usize>(
        &mut self,
        now: Instant,
        mle: &impl Mle,
        neighbors: &mut NeighborTable<N>,
        queue: &mut SendQueue<Q>,
    ) {
        for index in 0..neighbors.capacity() as u8 {
            if !neighbors.is_child(index) {
                continue;
            }

            let Some(child) = neighbors.get_mut(index) else {
                continue;
            };
            if !child.is_state_valid()
                || child.rx_on_when_idle()
                || child.supervision_interval() == 0
            {
                continue;
            }

            child.increment_units_since_last_supervision();

            if child.units_since_last_supervision() >= child.supervision_interval() {
                Self::send_message(index, child, queue);
            }
        }

        self.timer.start(now, Self::tick_period(mle));
    }

    /// Queue a supervision message for the child. Skipped when indirect
    /// traffic is already pending; allocation failure is silent and the
    /// next tick retries.
    fn send_message<const Q: usize>(index: u8, child: &Neighbor, queue: &mut SendQueue<Q>) {
        if child.csl.indirect_message_count() > 0 {
            return;
        }

        if queue.push(Message::supervision(index)).is_ok() {
            info!("sending supervision message to child {}", child.rloc16());
        }
    }
}

/// Child-side watchdog for downlink traffic from the parent.
///
/// While synchronized to a wake-up-capable central the effective timing
/// collapses to the wake-on-radio constants; recovery then means detaching
/// outright, since re-acquiring the wake-up schedule is faster than a Child
/// Update exchange that is unlikely to get through.
#[derive(Debug)]
pub struct SupervisionListener {
    timeout: u16,
    interval: u16,
    counter: u32,
    timer: Timer,
}

impl Default for SupervisionListener {
    fn default() -> Self {
        Self {
            timeout: config::SUPERVISION_DEFAULT_TIMEOUT,
            interval: config::SUPERVISION_DEFAULT_INTERVAL,
            counter: 0,
            timer: Timer::new(),
        }
    }
}

impl SupervisionListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, now: Instant, mle: &impl Mle, rx_on_when_idle: bool) {
        self.restart_timer(now, mle, rx_on_when_idle);
    }

    pub fn stop(&mut self) {
        self.timer.stop();
    }

    pub fn interval(&self) -> u16 {
        self.interval
    }

    /// Set the supervision interval requested from the parent. A change
    /// while attached is propagated with a Child Update Request.
    pub fn set_interval(&mut self, interval: u16, mle: &mut impl Mle) {
        if self.interval == interval {
            return;
        }

        info!("supervision interval: {} -> {}", self.interval, interval);
        self.interval = interval;

        if mle.is_child() {
            mle.send_child_update_request();
        }
    }

    pub fn timeout(&self) -> u16 {
        self.timeout
    }

    pub fn set_timeout(
        &mut self,
        timeout: u16,
        now: Instant,
        mle: &impl Mle,
        rx_on_when_idle: bool,
    ) {
        if self.timeout != timeout {
            info!("supervision timeout: {} -> {}", self.timeout, timeout);
            self.timeout = timeout;
            self.restart_timer(now, mle, rx_on_when_idle);
        }
    }

    /// Number of supervision timeouts seen since boot.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_running()
    }

    pub fn poll_at(&self) -> Option<Instant> {
        self.timer.fire_time()
    }

    /// The interval in force, in supervision units.
    pub fn current_interval(&self, mle: &impl Mle) -> u16 {
        if mle.is_csl_central_present() {
            config::WOR_INTERVAL
        } else {
            self.interval
        }
    }

    /// The timeout in force.
    pub fn current_timeout(&self, mle: &impl Mle) -> Duration {
        if mle.is_csl_central_present() {
            Duration::from_ms(config::WOR_TIMEOUT as i64 * 100)
        } else {
            Duration::from_secs(self.timeout as i64)
        }
    }

    /// Feed a received frame into the watchdog: a secure frame from the
    /// parent while attached rewinds the timer.
    pub fn update_on_receive<const N: usize>(
        &mut self,
        source: &Address,
        is_secure: bool,
        now: Instant,
        mle: &impl Mle,
        neighbors: &NeighborTable<N>,
        rx_on_when_idle: bool,
    ) {
        if self.timer.is_running()
            && is_secure
            && mle.is_child()
            && neighbors.is_parent_address(source)
        {
            self.restart_timer(now, mle, rx_on_when_idle);
        }
    }

    fn restart_timer(&mut self, now: Instant, mle: &impl Mle, rx_on_when_idle: bool) {
        let timeout = self.current_timeout(mle);

        if timeout != Duration::ZERO && !mle.is_disabled() && !rx_on_when_idle {
            self.timer.start(now, timeout);
        } else {
            self.timer.stop();
        }
    }

    pub fn poll(&mut self, now: Instant, mle: &mut impl Mle, rx_on_when_idle: bool) {
        if self.timer.poll(now) {
            self.handle_timer(now, mle, rx_on_when_idle);
        }
    }

    fn handle_timer(&mut self, now: Instant, mle: &mut impl Mle, rx_on_when_idle: bool) {
        if mle.is_child() && !rx_on_when_idle {
            warn!(
                "supervision timeout, no frame from parent in {} ms",
                self.current_timeout(mle).as_ms()
            );
            self.counter += 1;

            if mle.is_csl_central_present() {
                // A lost wake-up schedule is recovered faster by detaching
                // and sniffing for wake-up frames than by a Child Update
                // exchange.
                mle.become_detached();
            } else {
                mle.send_child_update_request();
            }
        }

        self.restart_timer(now, mle, rx_on_when_idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neighbors::NeighborState;
    use crate::traits::test_impls::MockMle;

    fn sleepy_child(n: u8, interval: u16) -> Neighbor {
        let mut child = Neighbor::new([n; 8], 0x2400 + n as u16);
        child.set_state(NeighborState::Valid);
        child.set_rx_on_when_idle(false);
        child.set_supervision_interval(interval);
        child
    }

    fn run_one_tick(
        supervisor: &mut ChildSupervisor,
        mle: &MockMle,
        neighbors: &mut NeighborTable<4>,
        queue: &mut SendQueue<4>,
    ) {
        let fire = supervisor.poll_at().expect("timer should be armed");
        supervisor.poll(fire, mle, neighbors, queue);
    }

    #[test]
    fn tick_emits_supervision_message() {
        let mut supervisor = ChildSupervisor::new();
        let mle = MockMle::default();
        let mut neighbors = NeighborTable::<4>::new();
        let mut queue = SendQueue::<4>::new();

        let index = neighbors.add(sleepy_child(1, 3)).unwrap();
        for _ in 0..2 {
            neighbors
                .get_mut(index)
                .unwrap()
                .increment_units_since_last_supervision();
        }

        supervisor.check_state(Instant::ZERO, &mle, &neighbors);
        run_one_tick(&mut supervisor, &mle, &mut neighbors, &mut queue);

        assert_eq!(
            neighbors.get(index).unwrap().units_since_last_supervision(),
            3
        );
        assert_eq!(queue.len(), 1);
        let message = queue.iter().next().unwrap();
        assert_eq!(message.kind(), MessageKind::Supervision);
        assert_eq!(message.data(), &[index]);
    }

    #[test]
    fn tick_skips_child_with_pending_traffic() {
        let mut supervisor = ChildSupervisor::new();
        let mle = MockMle::default();
        let mut neighbors = NeighborTable::<4>::new();
        let mut queue = SendQueue::<4>::new();

        let index = neighbors.add(sleepy_child(1, 3)).unwrap();
        let child = neighbors.get_mut(index).unwrap();
        for _ in 0..2 {
            child.increment_units_since_last_supervision();
        }
        child.csl.increment_indirect_message_count();

        supervisor.check_state(Instant::ZERO, &mle, &neighbors);
        run_one_tick(&mut supervisor, &mle, &mut neighbors, &mut queue);

        assert_eq!(
            neighbors.get(index).unwrap().units_since_last_supervision(),
            3
        );
        assert!(queue.is_empty(), "pending indirect traffic satisfies liveness");
    }

    #[test]
    fn timer_runs_only_with_valid_children_and_mle() {
        let mut supervisor = ChildSupervisor::new();
        let mut mle = MockMle::default();
        let mut neighbors = NeighborTable::<4>::new();

        supervisor.check_state(Instant::ZERO, &mle, &neighbors);
        assert!(!supervisor.is_running(), "no children yet");

        let index = neighbors.add(sleepy_child(1, 3)).unwrap();
        supervisor.check_state(Instant::ZERO, &mle, &neighbors);
        assert!(supervisor.is_running());

        // Repeated calls neither re-arm nor stop the timer.
        let fire = supervisor.poll_at();
        supervisor.check_state(Instant::from_ms(5), &mle, &neighbors);
        assert_eq!(supervisor.poll_at(), fire);

        mle.disabled = true;
        supervisor.check_state(Instant::from_ms(5), &mle, &neighbors);
        assert!(!supervisor.is_running());

        mle.disabled = false;
        neighbors.remove(index);
        supervisor.check_state(Instant::from_ms(5), &mle, &neighbors);
        assert!(!supervisor.is_running());
    }

    #[test]
    fn notifier_events_drive_check_state() {
        let mut supervisor = ChildSupervisor::new();
        let mle = MockMle::default();
        let mut neighbors = NeighborTable::<4>::new();
        neighbors.add(sleepy_child(1, 3)).unwrap();

        supervisor.handle_notifier_events(
            Events::CHILD_ADDED,
            Instant::ZERO,
            &mle,
            &neighbors,
        );
        assert!(supervisor.is_running());
    }

    #[test]
    fn tick_period_shrinks_under_csl_peripheral() {
        let mut supervisor = ChildSupervisor::new();
        let mut mle = MockMle::default();
        mle.csl_peripheral_present = true;
        let mut neighbors = NeighborTable::<4>::new();
        neighbors.add(sleepy_child(1, 3)).unwrap();

        supervisor.check_state(Instant::ZERO, &mle, &neighbors);
        assert_eq!(supervisor.poll_at(), Some(Instant::from_ms(100)));
    }

    #[test]
    fn update_on_send_resets_units() {
        let supervisor = ChildSupervisor::new();
        let mut child = sleepy_child(1, 3);
        child.increment_units_since_last_supervision();

        supervisor.update_on_send(&mut child);
        assert_eq!(child.units_since_last_supervision(), 0);
    }

    #[test]
    fn destination_resolves_from_payload() {
        let mut neighbors = NeighborTable::<4>::new();
        let index = neighbors.add(sleepy_child(5, 3)).unwrap();

        let message = Message::supervision(index);
        let child = ChildSupervisor::get_destination(&message, &neighbors).unwrap();
        assert_eq!(child.rloc16(), 0x2405);

        assert!(ChildSupervisor::get_destination(&Message::ip6(&[0]), &neighbors).is_none());
    }

    #[test]
    fn listener_timeout_requests_child_update() {
        let mut listener = SupervisionListener::new();
        let mut mle = MockMle::default();
        mle.child = true;

        listener.start(Instant::ZERO, &mle, false);
        assert!(listener.is_running());

        let fire = listener.poll_at().unwrap();
        assert_eq!(
            fire,
            Instant::ZERO + Duration::from_secs(config::SUPERVISION_DEFAULT_TIMEOUT as i64)
        );

        listener.poll(fire, &mut mle, false);
        assert_eq!(listener.counter(), 1);
        assert_eq!(mle.child_update_requests, 1);
        assert_eq!(mle.detach_requests, 0);
        assert!(listener.is_running(), "timer restarted after expiry");
    }

    #[test]
    fn listener_timeout_under_central_detaches() {
        let mut listener = SupervisionListener::new();
        let mut mle = MockMle::default();
        mle.child = true;
        mle.csl_central_present = true;

        listener.start(Instant::ZERO, &mle, false);
        let fire = listener.poll_at().unwrap();
        assert_eq!(
            fire,
            Instant::ZERO + Duration::from_ms(config::WOR_TIMEOUT as i64 * 100)
        );

        listener.poll(fire, &mut mle, false);
        assert_eq!(listener.counter(), 1);
        assert_eq!(mle.detach_requests, 1);
        assert_eq!(mle.child_update_requests, 0);
        assert!(listener.is_running());
    }

    #[test]
    fn listener_does_not_arm_when_rx_on() {
        let mut listener = SupervisionListener::new();
        let mle = MockMle::default();
        listener.start(Instant::ZERO, &mle, true);
        assert!(!listener.is_running());
    }

    #[test]
    fn set_interval_is_idempotent() {
        let mut listener = SupervisionListener::new();
        let mut mle = MockMle::default();
        mle.child = true;

        listener.set_interval(60, &mut mle);
        listener.set_interval(60, &mut mle);
        assert_eq!(mle.child_update_requests, 1);
    }

    #[test]
    fn set_timeout_restarts_timer() {
        let mut listener = SupervisionListener::new();
        let mut mle = MockMle::default();
        mle.child = true;

        listener.start(Instant::ZERO, &mle, false);
        listener.set_timeout(30, Instant::from_ms(500), &mle, false);
        assert_eq!(
            listener.poll_at(),
            Some(Instant::from_ms(500) + Duration::from_secs(30))
        );

        // Zero timeout disables the watchdog.
        listener.set_timeout(0, Instant::from_ms(600), &mle, false);
        assert!(!listener.is_running());
    }

    #[test]
    fn secure_parent_frame_rewinds_timer() {
        let mut listener = SupervisionListener::new();
        let mut mle = MockMle::default();
        mle.child = true;

        let mut neighbors = NeighborTable::<4>::new();
        let parent = neighbors.add(sleepy_child(1, 0)).unwrap();
        neighbors.set_parent(Some(parent));

        listener.start(Instant::ZERO, &mle, false);
        let armed = listener.poll_at().unwrap();

        let now = at_secs(10);
        listener.update_on_receive(
            &Address::Short(0x2401),
            true,
            now,
            &mle,
            &neighbors,
            false,
        );
        let rewound = listener.poll_at().unwrap();
        assert!(rewound > armed);

        // An insecure frame, or one from somebody else, changes nothing.
        listener.update_on_receive(
            &Address::Short(0x2401),
            false,
            at_secs(20),
            &mle,
            &neighbors,
            false,
        );
        listener.update_on_receive(
            &Address::Short(0xbeef),
            true,
            at_secs(20),
            &mle,
            &neighbors,
            false,
        );
        assert_eq!(listener.poll_at(), Some(rewound));
    }

    fn at_secs(secs: i64) -> Instant {
        Instant::from_us(secs * 1_000_000)
    }
}
