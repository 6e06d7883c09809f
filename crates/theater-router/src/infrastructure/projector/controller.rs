//! Projector controller: a [`Destination`] for picture and power actions and a
//! [`Source`] that publishes power-state changes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use theater_core::protocol::messages::items;
use theater_core::{
    data_value, decode_response, encode_request, Community, EnumType, Envelope, ErrorKind,
    PowerState, Request, Value, ValueType,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::dispatch::EventPublisher;
use crate::application::registry::{Destination, Source};
use crate::infrastructure::projector::link::DeviceLink;

/// Enum type name of the values the power watcher publishes.
pub const POWER_ENUM: &str = "ProjectorPower";

/// The `ProjectorPower` enum, for registering with a value codec registry.
pub fn power_enum() -> EnumType {
    EnumType::new(POWER_ENUM, PowerState::ALL.map(PowerState::name))
}

/// Shortest poll period; a zero interval is raised to this.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Actions accepted by [`ProjectorDestination`]: name, item and argument type.
static ACTIONS: [(&str, u16, ValueType); 5] = [
    ("Power", items::POWER_CONTROL, ValueType::Bool),
    ("Input", items::INPUT, ValueType::Integer),
    ("CalibrationPreset", items::CALIBRATION_PRESET, ValueType::Integer),
    ("Brightness", items::BRIGHTNESS, ValueType::Integer),
    ("Contrast", items::CONTRAST, ValueType::Integer),
];

/// Sends control requests to one projector.
pub struct ProjectorDestination {
    name: String,
    community: Community,
    link: Arc<dyn DeviceLink>,
}

impl ProjectorDestination {
    pub fn new(name: impl Into<String>, community: Community, link: Arc<dyn DeviceLink>) -> Self {
        Self {
            name: name.into(),
            community,
            link,
        }
    }

    async fn request(&self, request: Request) -> Result<Vec<u8>, ErrorKind> {
        let frame = encode_request(&request).map_err(|e| {
            warn!("cannot encode request for item 0x{:04X}: {e}", request.item_id);
            ErrorKind::InvalidLength
        })?;
        let response = self.link.exchange(frame).await?;
        decode_response(&response, request.request_type)
    }

    /// Reads `item` and returns its raw payload.
    ///
    /// # Errors
    ///
    /// Returns the transport or device [`ErrorKind`].
    pub async fn get(&self, item: u16) -> Result<Vec<u8>, ErrorKind> {
        self.request(Request::get(self.community, item)).await
    }

    /// Writes `value` to `item`.
    ///
    /// # Errors
    ///
    /// Returns the transport or device [`ErrorKind`].
    pub async fn set(&self, item: u16, value: u16) -> Result<(), ErrorKind> {
        self.request(Request::set(self.community, item, value))
            .await
            .map(|_| ())
    }

    /// Current power state.
    ///
    /// # Errors
    ///
    /// A payload that is not a known power state is reported as
    /// [`ErrorKind::UnknownResponse`].
    pub async fn power_state(&self) -> Result<PowerState, ErrorKind> {
        let payload = self.get(items::STATUS_POWER).await?;
        data_value(&payload)
            .ok()
            .and_then(|raw| PowerState::try_from(raw).ok())
            .ok_or(ErrorKind::UnknownResponse)
    }

    /// Model name as reported by the device, e.g. `"VPL-VW295"`.
    ///
    /// # Errors
    ///
    /// Returns the transport or device [`ErrorKind`].
    pub async fn model_name(&self) -> Result<String, ErrorKind> {
        let payload = self.get(items::MODEL_NAME).await?;
        Ok(String::from_utf8_lossy(&payload)
            .trim_end_matches('\0')
            .to_string())
    }
}

/// Converts an action argument to the 16-bit value sent on the wire and the
/// text used in the result line.
fn wire_value(expected: &ValueType, args: &Value) -> Result<(u16, String), String> {
    match (expected, args) {
        (ValueType::Bool, Value::Bool(on)) => {
            Ok((u16::from(*on), if *on { "on" } else { "off" }.to_string()))
        }
        (ValueType::Integer, Value::Integer(n)) => u16::try_from(*n)
            .map(|v| (v, n.to_string()))
            .map_err(|_| format!("{n} is outside 0..={}", u16::MAX)),
        _ => Err(format!("expects {expected}, got {}", args.value_type())),
    }
}

#[async_trait]
impl Destination for ProjectorDestination {
    fn name(&self) -> &str {
        &self.name
    }

    fn actions(&self) -> BTreeMap<String, ValueType> {
        ACTIONS
            .iter()
            .map(|(name, _, ty)| (name.to_string(), ty.clone()))
            .collect()
    }

    async fn route_action(&self, action: &str, args: &Value) -> Result<String, String> {
        let Some((_, item, expected)) = ACTIONS.iter().find(|(name, _, _)| *name == action) else {
            return Err(format!("{}: unknown action {action:?}", self.name));
        };
        let (value, shown) =
            wire_value(expected, args).map_err(|e| format!("{}: {action} {e}", self.name))?;

        debug!("{}: set item 0x{item:04X} to {value}", self.name);
        self.set(*item, value)
            .await
            .map(|()| format!("{}: {action} set to {shown}", self.name))
            .map_err(|kind| format!("{}: {action} failed: {kind}", self.name))
    }
}

// ── Power watcher ─────────────────────────────────────────────────────────────

/// Publishes a `ProjectorPower` envelope whenever the polled power state
/// changes.
pub struct PowerWatcher {
    projector: Arc<ProjectorDestination>,
}

impl PowerWatcher {
    pub fn new(projector: Arc<ProjectorDestination>) -> Self {
        Self { projector }
    }

    /// Polls every `interval` (at least 1 ms) until `shutdown` turns true.
    ///
    /// The first successful poll always publishes, so rules see the initial
    /// state.  Poll failures are logged and skipped.
    pub fn spawn(
        &self,
        publisher: EventPublisher,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let projector = Arc::clone(&self.projector);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(MIN_POLL_INTERVAL));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last: Option<PowerState> = None;
            let mut last_error: Option<ErrorKind> = None;

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.wait_for(|stop| *stop) => break,
                    _ = ticker.tick() => {}
                }

                match projector.power_state().await {
                    Ok(state) => {
                        last_error = None;
                        if last == Some(state) {
                            continue;
                        }
                        last = Some(state);
                        info!("{}: power is {}", projector.name, state.name());
                        match Envelope::new(
                            projector.name.as_str(),
                            Value::enum_member(POWER_ENUM, state.name()),
                        ) {
                            Ok(envelope) => publisher.publish(envelope),
                            Err(e) => warn!("cannot publish power state: {e}"),
                        }
                    }
                    Err(kind) => {
                        if last_error != Some(kind) {
                            warn!("{}: power poll failed: {kind}", projector.name);
                            last_error = Some(kind);
                        }
                    }
                }
            }
            debug!("{}: power watcher stopped", projector.name);
        })
    }
}

impl Source for PowerWatcher {
    fn name(&self) -> &str {
        &self.projector.name
    }

    fn match_type(&self) -> ValueType {
        ValueType::Enum(POWER_ENUM.to_string())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::projector::link::MockDeviceLink;
    use mockall::predicate::eq;
    use theater_core::protocol::messages::HEADER_SIZE;

    fn ok_frame(item: u16, body: &[u8]) -> Vec<u8> {
        let [hi, lo] = item.to_be_bytes();
        let mut frame = vec![0x02, 0x0A, b'S', b'O', b'N', b'Y', 0x01, hi, lo, body.len() as u8];
        frame.extend_from_slice(body);
        frame
    }

    fn error_frame(item: u16, kind: ErrorKind) -> Vec<u8> {
        let [hi, lo] = item.to_be_bytes();
        let mut frame = vec![0x02, 0x0A, b'S', b'O', b'N', b'Y', 0x00, hi, lo, 0x02];
        frame.extend_from_slice(&kind.code().to_be_bytes());
        frame
    }

    fn projector(link: MockDeviceLink) -> ProjectorDestination {
        ProjectorDestination::new("Projector", Community::default(), Arc::new(link))
    }

    #[test]
    fn test_actions_lists_every_supported_action() {
        let dest = projector(MockDeviceLink::new());
        let actions = dest.actions();
        assert_eq!(actions.len(), 5);
        assert_eq!(actions.get("Power"), Some(&ValueType::Bool));
        assert_eq!(actions.get("Contrast"), Some(&ValueType::Integer));
    }

    #[test]
    fn test_power_enum_has_all_states() {
        let power = power_enum();
        assert_eq!(power.name, "ProjectorPower");
        assert_eq!(power.members.len(), 9);
        assert!(power.has_member("SavingStandby"));
    }

    #[tokio::test]
    async fn test_power_on_sends_set_power_control() {
        // Arrange
        let expected = encode_request(&Request::set(Community::default(), items::POWER_CONTROL, 1)).unwrap();
        let mut link = MockDeviceLink::new();
        link.expect_exchange()
            .with(eq(expected))
            .times(1)
            .returning(|_| Ok(ok_frame(items::POWER_CONTROL, &[])));

        // Act
        let result = projector(link).route_action("Power", &Value::Bool(true)).await;

        // Assert
        assert_eq!(result, Ok("Projector: Power set to on".to_string()));
    }

    #[tokio::test]
    async fn test_input_sends_big_endian_value() {
        let mut link = MockDeviceLink::new();
        link.expect_exchange()
            .withf(|frame| frame[7..9] == [0x00u8, 0x01] && frame[HEADER_SIZE..] == [0x00u8, 0x03])
            .times(1)
            .returning(|_| Ok(ok_frame(items::INPUT, &[])));

        let result = projector(link).route_action("Input", &Value::Integer(3)).await;

        assert_eq!(result, Ok("Projector: Input set to 3".to_string()));
    }

    #[tokio::test]
    async fn test_device_error_becomes_failure_text() {
        let mut link = MockDeviceLink::new();
        link.expect_exchange()
            .returning(|_| Ok(error_frame(items::BRIGHTNESS, ErrorKind::NotApplicableItem)));

        let result = projector(link).route_action("Brightness", &Value::Integer(50)).await;

        let message = result.unwrap_err();
        assert!(message.starts_with("Projector: Brightness failed"), "{message}");
    }

    #[tokio::test]
    async fn test_transport_error_becomes_failure_text() {
        let mut link = MockDeviceLink::new();
        link.expect_exchange().returning(|_| Err(ErrorKind::NetworkTimeout));

        let result = projector(link).route_action("Power", &Value::Bool(false)).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_out_of_range_argument_is_rejected_without_io() {
        let mut link = MockDeviceLink::new();
        link.expect_exchange().never();

        let result = projector(link).route_action("Contrast", &Value::Integer(70_000)).await;

        assert!(result.unwrap_err().contains("outside"));
    }

    #[tokio::test]
    async fn test_wrong_argument_type_is_rejected_without_io() {
        let mut link = MockDeviceLink::new();
        link.expect_exchange().never();

        let result = projector(link).route_action("Power", &Value::Integer(1)).await;

        assert!(result.unwrap_err().contains("expects bool"));
    }

    #[tokio::test]
    async fn test_unknown_action_is_rejected() {
        let result = projector(MockDeviceLink::new())
            .route_action("SelfDestruct", &Value::Bool(true))
            .await;
        assert!(result.unwrap_err().contains("unknown action"));
    }

    #[tokio::test]
    async fn test_power_state_decodes_status_payload() {
        let mut link = MockDeviceLink::new();
        link.expect_exchange()
            .returning(|_| Ok(ok_frame(items::STATUS_POWER, &[0x00, 0x03])));

        let state = projector(link).power_state().await;

        assert_eq!(state, Ok(PowerState::PowerOn));
    }

    #[tokio::test]
    async fn test_power_state_rejects_unknown_value() {
        let mut link = MockDeviceLink::new();
        link.expect_exchange()
            .returning(|_| Ok(ok_frame(items::STATUS_POWER, &[0x00, 0x42])));

        let state = projector(link).power_state().await;

        assert_eq!(state, Err(ErrorKind::UnknownResponse));
    }

    #[tokio::test]
    async fn test_model_name_reads_text_payload() {
        let mut link = MockDeviceLink::new();
        link.expect_exchange()
            .returning(|_| Ok(ok_frame(items::MODEL_NAME, b"MODL")));

        assert_eq!(projector(link).model_name().await, Ok("MODL".to_string()));
    }

    #[tokio::test]
    async fn test_watcher_publishes_only_on_change() {
        // Arrange: Standby twice, then PowerOn forever
        let mut link = MockDeviceLink::new();
        let mut polls = 0u8;
        link.expect_exchange().returning(move |_| {
            polls = polls.saturating_add(1);
            let state = if polls <= 2 { 0x00 } else { 0x03 };
            Ok(ok_frame(items::STATUS_POWER, &[0x00, state]))
        });

        let (publisher, mut queue) = EventPublisher::detached();
        let (stop_tx, stop_rx) = watch::channel(false);
        let watcher = PowerWatcher::new(Arc::new(projector(link)));

        // Act
        let handle = watcher.spawn(publisher, Duration::from_millis(5), stop_rx);
        let first = queue.recv().await.unwrap();
        let second = queue.recv().await.unwrap();
        stop_tx.send_replace(true);
        handle.await.unwrap();

        // Assert
        assert_eq!(first.data(), &Value::enum_member(POWER_ENUM, "Standby"));
        assert_eq!(second.data(), &Value::enum_member(POWER_ENUM, "PowerOn"));
        assert!(queue.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_watcher_with_zero_interval_still_polls() {
        let mut link = MockDeviceLink::new();
        link.expect_exchange()
            .returning(|_| Ok(ok_frame(items::STATUS_POWER, &[0x00, 0x03])));
        let (publisher, mut queue) = EventPublisher::detached();
        let (stop_tx, stop_rx) = watch::channel(false);
        let watcher = PowerWatcher::new(Arc::new(projector(link)));

        let handle = watcher.spawn(publisher, Duration::ZERO, stop_rx);
        let first = queue.recv().await.unwrap();
        stop_tx.send_replace(true);

        assert!(handle.await.is_ok());
        assert_eq!(first.data(), &Value::enum_member(POWER_ENUM, "PowerOn"));
    }
}
