use crate::config::AlertConfig;
use crate::document::SensorDocument;
use serde::Serialize;
use std::fmt;
use tracing::trace;

/// Hazard condition selected for a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    FlameDetected,
    ShockDetected,
    AlcoholDetected,
    ButtonPressed,
    NoGpsSignal,
    HighTemperature,
    HighHumidity,
    HighAcceleration,
    NoAlert,
}

impl AlertCondition {
    /// Human-readable label used in notification messages
    pub fn label(&self) -> &'static str {
        match self {
            AlertCondition::FlameDetected => "Flame detected!",
            AlertCondition::ShockDetected => "Shock detected!",
            AlertCondition::AlcoholDetected => "Alcohol detected!",
            AlertCondition::ButtonPressed => "Button pressed!",
            AlertCondition::NoGpsSignal => "No GPS signal!",
            AlertCondition::HighTemperature => "High temperature!",
            AlertCondition::HighHumidity => "High humidity!",
            AlertCondition::HighAcceleration => "High acceleration!",
            AlertCondition::NoAlert => "No alert",
        }
    }

    /// Stable snake_case name, used for metrics labels and the store column
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCondition::FlameDetected => "flame_detected",
            AlertCondition::ShockDetected => "shock_detected",
            AlertCondition::AlcoholDetected => "alcohol_detected",
            AlertCondition::ButtonPressed => "button_pressed",
            AlertCondition::NoGpsSignal => "no_gps_signal",
            AlertCondition::HighTemperature => "high_temperature",
            AlertCondition::HighHumidity => "high_humidity",
            AlertCondition::HighAcceleration => "high_acceleration",
            AlertCondition::NoAlert => "no_alert",
        }
    }

    pub fn is_alert(&self) -> bool {
        *self != AlertCondition::NoAlert
    }
}

impl fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selects at most one alert per document.
///
/// Rules run in strict priority order and the first match wins:
/// - hazard flags: flame, shock, alcohol, panic button
/// - missing GPS fix (`[0, 0, 0]`)
/// - temperature, then humidity, above threshold
/// - any accelerometer axis above threshold
///
/// Thresholds are strict: a value equal to its threshold does not alert.
#[derive(Debug, Clone)]
pub struct AlertEvaluator {
    config: AlertConfig,
}

impl AlertEvaluator {
    pub fn new(config: AlertConfig) -> Self {
        Self { config }
    }

    pub fn thresholds(&self) -> &AlertConfig {
        &self.config
    }

    /// Select the highest-priority condition present in the document
    pub fn evaluate(&self, doc: &SensorDocument) -> AlertCondition {
        let condition = self.check_flags(doc).unwrap_or_else(|| self.check_readings(doc));

        trace!(document_id = %doc.id, condition = %condition, "Evaluated document");

        condition
    }

    fn check_flags(&self, doc: &SensorDocument) -> Option<AlertCondition> {
        if doc.flame_detected {
            Some(AlertCondition::FlameDetected)
        } else if doc.shock_detected {
            Some(AlertCondition::ShockDetected)
        } else if doc.alcohol_detected {
            Some(AlertCondition::AlcoholDetected)
        } else if doc.button_pressed {
            Some(AlertCondition::ButtonPressed)
        } else {
            None
        }
    }

    fn check_readings(&self, doc: &SensorDocument) -> AlertCondition {
        let accel = &doc.accelerometer;
        let max_accel = self.config.max_acceleration;

        if doc.location.is_unfixed() {
            AlertCondition::NoGpsSignal
        } else if doc.temperature > self.config.max_temperature {
            AlertCondition::HighTemperature
        } else if doc.humidity > self.config.max_humidity {
            AlertCondition::HighHumidity
        } else if accel.x > max_accel || accel.y > max_accel || accel.z > max_accel {
            AlertCondition::HighAcceleration
        } else {
            AlertCondition::NoAlert
        }
    }
}

impl Default for AlertEvaluator {
    fn default() -> Self {
        Self::new(AlertConfig::default())
    }
}

/// Builder for creating an AlertEvaluator with custom thresholds
pub struct AlertEvaluatorBuilder {
    config: AlertConfig,
}

impl AlertEvaluatorBuilder {
    pub fn new() -> Self {
        Self {
            config: AlertConfig::default(),
        }
    }

    pub fn max_temperature(mut self, celsius: f64) -> Self {
        self.config.max_temperature = celsius;
        self
    }

    pub fn max_humidity(mut self, percent: f64) -> Self {
        self.config.max_humidity = percent;
        self
    }

    pub fn max_acceleration(mut self, g: f64) -> Self {
        self.config.max_acceleration = g;
        self
    }

    pub fn build(self) -> AlertEvaluator {
        AlertEvaluator::new(self.config)
    }
}

impl Default for AlertEvaluatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
