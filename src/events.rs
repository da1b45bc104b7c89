// Outbound notifications
//
// The controller reports each confirmed transition once through an
// EventSink. On target the sink is a static embassy-sync Channel the
// UI task drains; a full channel drops the event with a warning
// rather than blocking the control loop.

use core::fmt;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeEvent {
    PowerIn,
    PowerOut,
    PowerStandby,
    BatteryTooLow,
    BatteryLow,
    BatteryLowEx,
    ChargeStart,
    ChargeStop,
    ChargeFull,
    CapacityChanged(u8),
    BootstrapExit,
}

impl fmt::Display for ChargeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChargeEvent::PowerIn => write!(f, "PowerIn"),
            ChargeEvent::PowerOut => write!(f, "PowerOut"),
            ChargeEvent::PowerStandby => write!(f, "PowerStandby"),
            ChargeEvent::BatteryTooLow => write!(f, "BatteryTooLow"),
            ChargeEvent::BatteryLow => write!(f, "BatteryLow"),
            ChargeEvent::BatteryLowEx => write!(f, "BatteryLowEx"),
            ChargeEvent::ChargeStart => write!(f, "ChargeStart"),
            ChargeEvent::ChargeStop => write!(f, "ChargeStop"),
            ChargeEvent::ChargeFull => write!(f, "ChargeFull"),
            ChargeEvent::CapacityChanged(pct) => write!(f, "CapacityChanged({}%)", pct),
            ChargeEvent::BootstrapExit => write!(f, "BootstrapExit"),
        }
    }
}

pub trait EventSink {
    fn notify(&mut self, event: ChargeEvent);
}

/// Capacity of the charge event channel.
///
/// A tick emits at most a handful of events (power edge, low-battery
/// warning, capacity change), so 8 slots cover a few ticks of a busy
/// consumer.
pub const EVENT_CHANNEL_CAP: usize = 8;

pub type EventChannel = Channel<CriticalSectionRawMutex, ChargeEvent, EVENT_CHANNEL_CAP>;

/// Forwards into a static channel without blocking.
pub struct ChannelSink {
    channel: &'static EventChannel,
}

impl ChannelSink {
    pub const fn new(channel: &'static EventChannel) -> Self {
        Self { channel }
    }
}

impl EventSink for ChannelSink {
    fn notify(&mut self, event: ChargeEvent) {
        if self.channel.try_send(event).is_err() {
            warn!("charge: event channel full, dropped {}", event);
        }
    }
}
