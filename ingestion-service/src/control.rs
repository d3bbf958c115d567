use rumqttc::{AsyncClient, QoS};

pub const TIMER_MIN_MINUTES: u16 = 1;
pub const TIMER_MAX_MINUTES: u16 = 180;

#[derive(thiserror::Error, Debug)]
#[error("timer must be between {TIMER_MIN_MINUTES} and {TIMER_MAX_MINUTES} minutes, got {0}")]
pub struct InvalidTimer(pub i64);

/// A device timer value in minutes, bounds-checked at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSetting(u16);

impl TimerSetting {
    pub fn new(minutes: i64) -> Result<Self, InvalidTimer> {
        if (i64::from(TIMER_MIN_MINUTES)..=i64::from(TIMER_MAX_MINUTES)).contains(&minutes) {
            Ok(Self(minutes as u16))
        } else {
            Err(InvalidTimer(minutes))
        }
    }

    pub fn minutes(self) -> u16 {
        self.0
    }
}

/// Publishes timer settings as plain-text integers to the device control
/// topic. The ingestion bridge never subscribes to this topic.
pub struct TimerPublisher {
    client: AsyncClient,
    topic: String,
}

impl TimerPublisher {
    pub fn new(client: AsyncClient, topic: impl Into<String>) -> Self {
        Self {
            client,
            topic: topic.into(),
        }
    }

    pub async fn publish(&self, setting: TimerSetting) -> Result<(), rumqttc::ClientError> {
        self.client
            .publish(
                self.topic.as_str(),
                QoS::AtMostOnce,
                false,
                setting.minutes().to_string(),
            )
            .await?;
        tracing::info!(minutes = setting.minutes(), topic = %self.topic, "published timer setting");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bounds_inclusive() {
        assert_eq!(TimerSetting::new(1).unwrap().minutes(), 1);
        assert_eq!(TimerSetting::new(180).unwrap().minutes(), 180);
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(TimerSetting::new(0).is_err());
        assert!(TimerSetting::new(181).is_err());
        assert!(TimerSetting::new(-5).is_err());
    }
}
