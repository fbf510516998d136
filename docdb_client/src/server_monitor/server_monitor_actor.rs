use std::sync::Arc;

use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, Notify},
    time::Instant,
};
use tracing::instrument;

use crate::{
    heartbeat::{ConnectionFactory, HeartbeatChannel},
    HeartbeatError, ServerAddress, ServerDescription,
};

use super::{
    ExponentiallyWeightedMovingAverage, ServerDescriptionChangedEvent, ServerMonitorSettings,
    ServerMonitorState,
};

pub(crate) struct ServerMonitorActor {
    address: ServerAddress,
    settings: ServerMonitorSettings,
    connection_factory: Arc<dyn ConnectionFactory>,
    /// Where every heartbeat outcome is delivered.
    listener: mpsc::UnboundedSender<ServerDescriptionChangedEvent>,
    check_now: Arc<Notify>,
    state: Arc<Mutex<ServerMonitorState>>,
    /// Owned exclusively by this actor. `None` until opened or after it was discarded.
    connection: Option<Box<dyn HeartbeatChannel>>,
    average_round_trip_time: ExponentiallyWeightedMovingAverage,
    description: ServerDescription,
}

impl ServerMonitorActor {
    pub(crate) fn new(
        address: ServerAddress,
        settings: ServerMonitorSettings,
        connection_factory: Arc<dyn ConnectionFactory>,
        listener: mpsc::UnboundedSender<ServerDescriptionChangedEvent>,
        check_now: Arc<Notify>,
        state: Arc<Mutex<ServerMonitorState>>,
    ) -> Self {
        Self {
            description: ServerDescription::connecting(address.clone()),
            address,
            settings,
            connection_factory,
            listener,
            check_now,
            state,
            connection: None,
            average_round_trip_time: ExponentiallyWeightedMovingAverage::default(),
        }
    }

    fn set_state(&self, new_state: ServerMonitorState) {
        let mut state = self.state.lock();
        if *state != ServerMonitorState::Closed {
            *state = new_state;
        }
    }

    /// Runs one heartbeat cycle, retrying once on a fresh connection after a transport
    /// failure. Never fails: errors end up in the returned description.
    #[instrument(level = "trace", skip(self), fields(address = %self.address))]
    async fn check_server(&mut self) -> ServerDescription {
        match self.heartbeat().await {
            Ok(description) => description,
            Err(e) if e.is_retryable() => {
                tracing::debug!(
                    "Heartbeat to `{}` failed, retrying on a fresh connection. Caused by: {}",
                    self.address,
                    e
                );
                match self.heartbeat().await {
                    Ok(description) => description,
                    Err(e) => {
                        tracing::debug!("Retried heartbeat to `{}` failed. Caused by: {}", self.address, e);
                        ServerDescription::failed(self.address.clone(), e)
                    }
                }
            }
            Err(e) => {
                tracing::debug!("Heartbeat to `{}` failed. Caused by: {}", self.address, e);
                ServerDescription::failed(self.address.clone(), e)
            }
        }
    }

    async fn heartbeat(&mut self) -> Result<ServerDescription, HeartbeatError> {
        let result = self.try_heartbeat().await;
        if let Err(e) = &result {
            self.handle_failure(e);
        }
        result
    }

    async fn try_heartbeat(&mut self) -> Result<ServerDescription, HeartbeatError> {
        if self.connection.is_none() {
            tracing::trace!("Opening heartbeat connection to `{}`", self.address);
            self.connection = Some(self.connection_factory.open(&self.address).await?);
        }
        let connection = self.connection.as_mut().ok_or_else(|| {
            HeartbeatError::Transport(format!("No connection to `{}`", self.address))
        })?;

        let started = Instant::now();
        let reply = connection.check().await?;
        let sample = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        let average = self.average_round_trip_time.add_sample(sample);

        Ok(ServerDescription::from_reply(
            self.address.clone(),
            &reply,
            average,
        ))
    }

    fn handle_failure(&mut self, error: &HeartbeatError) {
        self.average_round_trip_time.reset();
        if error.invalidates_connection() {
            self.connection = None;
            self.connection_factory.invalidate(&self.address);
        }
    }

    /// Sleeps until the next scheduled heartbeat, or until a check is requested, but never
    /// less than the minimum heartbeat frequency after `last_check`.
    async fn wait_for_next_check(&self, last_check: Instant) {
        let next_check = last_check + self.settings.heartbeat_frequency;
        tokio::select! {
            _ = tokio::time::sleep_until(next_check) => {}
            _ = self.check_now.notified() => {
                let earliest = last_check + self.settings.min_heartbeat_frequency;
                if Instant::now() < earliest {
                    tracing::trace!(
                        "Check of `{}` requested early, waiting for the minimum heartbeat frequency.",
                        self.address
                    );
                    tokio::time::sleep_until(earliest).await;
                }
            }
        }
    }

    fn publish(&mut self, current: ServerDescription) -> bool {
        let previous = std::mem::replace(&mut self.description, current.clone());
        let event = ServerDescriptionChangedEvent { previous, current };

        if event.is_material() {
            tracing::debug!("Monitor observed a change: {}", event.current);
        } else {
            tracing::trace!(
                "Round trip time of `{}` is now {} ns",
                self.address,
                event.current.round_trip_time_nanos()
            );
        }

        self.listener.send(event).is_ok()
    }
}

#[instrument(
    level = "debug",
    name = "Running Server Monitor",
    skip(actor),
    fields(address = %actor.address)
)]
pub(crate) async fn run_server_monitor_actor(mut actor: ServerMonitorActor) {
    loop {
        actor.set_state(ServerMonitorState::Heartbeating);
        let last_check = Instant::now();
        let current = actor.check_server().await;
        actor.set_state(ServerMonitorState::Idle);

        if !actor.publish(current) {
            tracing::debug!(
                "Nobody is listening for `{}` any more. Stopping monitor.",
                actor.address
            );
            break;
        }

        actor.wait_for_next_check(last_check).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{
        heartbeat::{mock::MockConnectionFactory, HeartbeatReply},
        ServerConnectionState, ServerType,
    };

    use super::*;

    fn address() -> ServerAddress {
        ServerAddress::new("a", 27017)
    }

    fn actor(
        factory: &MockConnectionFactory,
    ) -> (
        ServerMonitorActor,
        mpsc::UnboundedReceiver<ServerDescriptionChangedEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = ServerMonitorActor::new(
            address(),
            ServerMonitorSettings {
                heartbeat_frequency: Duration::from_secs(10),
                min_heartbeat_frequency: Duration::from_millis(500),
            },
            Arc::new(factory.clone()),
            tx,
            Arc::new(Notify::new()),
            Arc::new(Mutex::new(ServerMonitorState::Idle)),
        );
        (actor, rx)
    }

    fn standalone() -> HeartbeatReply {
        HeartbeatReply {
            ok: 1.0,
            max_wire_version: 17,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn successful_heartbeat_builds_connected_description() {
        // Arrange
        let factory = MockConnectionFactory::new();
        factory.set_reply(address(), standalone());
        let (mut actor, _rx) = actor(&factory);

        // Act
        let description = actor.check_server().await;

        // Assert
        assert_eq!(description.state(), ServerConnectionState::Connected);
        assert_eq!(description.server_type(), ServerType::Standalone);
        assert!(description.is_ok());
        assert_eq!(factory.open_count(&address()), 1);
    }

    #[tokio::test]
    async fn monitor_with_an_open_connection_runs_on_a_spawned_task() {
        // Arrange
        let factory = MockConnectionFactory::new();
        factory.set_reply(address(), standalone());
        let (mut actor, mut rx) = actor(&factory);
        actor.check_server().await;
        assert!(actor.connection.is_some());

        // Act
        let task = tokio::spawn(run_server_monitor_actor(actor));
        let event = rx.recv().await.unwrap();
        task.abort();

        // Assert
        assert!(event.current.is_ok());
        assert_eq!(factory.open_count(&address()), 1);
    }

    #[tokio::test]
    async fn transport_failure_is_retried_once_on_a_fresh_connection() {
        // Arrange
        let factory = MockConnectionFactory::new();
        factory.set_reply(address(), standalone());
        factory.push_outcome(address(), Err(HeartbeatError::Transport("reset".to_string())));
        let (mut actor, _rx) = actor(&factory);

        // Act
        let description = actor.check_server().await;

        // Assert
        assert!(description.is_ok());
        assert_eq!(factory.open_count(&address()), 2);
        assert_eq!(factory.check_count(&address()), 2);
        assert_eq!(factory.invalidation_count(&address()), 1);
    }

    #[tokio::test]
    async fn second_transport_failure_reports_connecting_unknown() {
        // Arrange
        let factory = MockConnectionFactory::new();
        factory.set_error(address(), HeartbeatError::Transport("refused".to_string()));
        let (mut actor, _rx) = actor(&factory);

        // Act
        let description = actor.check_server().await;

        // Assert
        assert_eq!(description.state(), ServerConnectionState::Connecting);
        assert_eq!(description.server_type(), ServerType::Unknown);
        assert!(!description.is_ok());
        assert_eq!(
            description.last_error(),
            Some(&HeartbeatError::Transport("refused".to_string()))
        );
        assert_eq!(factory.check_count(&address()), 2);
        assert_eq!(actor.average_round_trip_time.average(), 0);
    }

    #[tokio::test]
    async fn authentication_failure_invalidates_without_retrying() {
        // Arrange
        let factory = MockConnectionFactory::new();
        factory.set_error(address(), HeartbeatError::Authentication("denied".to_string()));
        let (mut actor, _rx) = actor(&factory);

        // Act
        let description = actor.check_server().await;

        // Assert
        assert!(!description.is_ok());
        assert_eq!(factory.check_count(&address()), 1);
        assert_eq!(factory.invalidation_count(&address()), 1);
        assert!(actor.connection.is_none());
    }

    #[tokio::test]
    async fn read_timeout_keeps_the_connection_but_resets_latency() {
        // Arrange
        let factory = MockConnectionFactory::new();
        factory.set_reply(address(), standalone());
        let (mut actor, _rx) = actor(&factory);
        actor.check_server().await;
        actor.average_round_trip_time.add_sample(5_000);
        factory.push_outcome(address(), Err(HeartbeatError::ReadTimeout("slow".to_string())));

        // Act
        let description = actor.check_server().await;

        // Assert
        assert!(!description.is_ok());
        assert_eq!(factory.invalidation_count(&address()), 0);
        assert_eq!(factory.open_count(&address()), 1);
        assert!(actor.connection.is_some());
        assert_eq!(actor.average_round_trip_time.average(), 0);
    }

    #[tokio::test]
    async fn publish_delivers_previous_and_current() {
        // Arrange
        let factory = MockConnectionFactory::new();
        factory.set_reply(address(), standalone());
        let (mut actor, mut rx) = actor(&factory);
        let current = actor.check_server().await;

        // Act
        assert!(actor.publish(current.clone()));
        assert!(actor.publish(current.clone()));

        // Assert
        let first = rx.recv().await.unwrap();
        assert_eq!(first.previous.server_type(), ServerType::Unknown);
        assert_eq!(first.current, current);
        assert!(first.is_material());
        let second = rx.recv().await.unwrap();
        assert!(!second.is_material());
    }

    #[tokio::test(start_paused = true)]
    async fn early_check_waits_for_the_minimum_heartbeat_frequency() {
        // Arrange
        let factory = MockConnectionFactory::new();
        let (actor, _rx) = actor(&factory);
        let last_check = Instant::now();
        actor.check_now.notify_one();

        // Act
        actor.wait_for_next_check(last_check).await;

        // Assert
        let waited = last_check.elapsed();
        assert!(waited >= Duration::from_millis(500));
        assert!(waited < Duration::from_millis(510));
    }

    #[tokio::test(start_paused = true)]
    async fn late_check_request_proceeds_immediately() {
        // Arrange
        let factory = MockConnectionFactory::new();
        let (actor, _rx) = actor(&factory);
        let last_check = Instant::now();
        tokio::time::advance(Duration::from_secs(2)).await;
        actor.check_now.notify_one();

        // Act
        actor.wait_for_next_check(last_check).await;

        // Assert
        let waited = last_check.elapsed();
        assert!(waited >= Duration::from_secs(2));
        assert!(waited < Duration::from_millis(2_010));
    }

    #[tokio::test(start_paused = true)]
    async fn without_a_request_waits_the_full_heartbeat_frequency() {
        // Arrange
        let factory = MockConnectionFactory::new();
        let (actor, _rx) = actor(&factory);
        let last_check = Instant::now();

        // Act
        actor.wait_for_next_check(last_check).await;

        // Assert
        let waited = last_check.elapsed();
        assert!(waited >= Duration::from_secs(10));
        assert!(waited < Duration::from_millis(10_010));
    }
}
