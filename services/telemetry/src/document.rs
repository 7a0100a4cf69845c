use crate::codec::{RawReading, CLIMATE_LEN, LOCATION_LEN, MOTION_LEN};
use crate::error::BuildError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for ids derived from queue message identity
const MESSAGE_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_93d7_4b8a_b5e0_7c3f_1d92_a604);

/// Persisted telemetry document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDocument {
    /// Unique document ID
    pub id: Uuid,
    /// GPS position; `[0, 0, 0]` means no fix
    pub location: GeoPoint,
    /// Degrees Celsius
    pub temperature: f64,
    /// Relative humidity, percent
    pub humidity: f64,
    pub flame_detected: bool,
    pub shock_detected: bool,
    pub alcohol_detected: bool,
    pub button_pressed: bool,
    /// Acceleration in g
    pub accelerometer: Axes,
    /// Angular rate in degrees per second
    pub gyroscope: Axes,
}

/// GeoJSON point holding `[lat, lon, alt]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "Point")]
pub struct GeoPoint {
    pub coordinates: [f64; 3],
}

impl GeoPoint {
    /// True when the device reported the no-fix sentinel
    pub fn is_unfixed(&self) -> bool {
        self.coordinates == [0.0, 0.0, 0.0]
    }
}

/// Three-axis sensor sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Axes {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// How document ids are assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// Fresh random UUID per build
    #[default]
    Random,
    /// UUIDv5 of the queue message identity, stable across redelivery
    Message,
}

/// Projects decoded readings into [`SensorDocument`]s
#[derive(Debug, Clone, Default)]
pub struct DocumentBuilder {
    id_strategy: IdStrategy,
}

impl DocumentBuilder {
    pub fn new(id_strategy: IdStrategy) -> Self {
        Self { id_strategy }
    }

    pub fn id_strategy(&self) -> IdStrategy {
        self.id_strategy
    }

    /// Build a document with a fresh random id
    pub fn build(&self, reading: &RawReading) -> Result<SensorDocument, BuildError> {
        Self::build_with_id(reading, Uuid::new_v4())
    }

    /// Build a document for a queue message, honouring the id strategy
    pub fn build_for_message(
        &self,
        reading: &RawReading,
        message_id: &str,
    ) -> Result<SensorDocument, BuildError> {
        match self.id_strategy {
            IdStrategy::Random => self.build(reading),
            IdStrategy::Message => Self::build_with_id(reading, message_document_id(message_id)),
        }
    }

    /// Build a document with the given id.
    ///
    /// Re-checks every group length and rejects non-finite values, so
    /// readings assembled outside the codec are held to the same shape.
    pub fn build_with_id(reading: &RawReading, id: Uuid) -> Result<SensorDocument, BuildError> {
        let location = fixed::<LOCATION_LEN>("location", &reading.location)?;
        let climate = fixed::<CLIMATE_LEN>("climate", &reading.climate)?;
        let motion = fixed::<MOTION_LEN>("motion", &reading.motion)?;

        Ok(SensorDocument {
            id,
            location: GeoPoint {
                coordinates: location,
            },
            temperature: climate[0],
            humidity: climate[1],
            flame_detected: reading.flame != 0,
            shock_detected: reading.shock != 0,
            alcohol_detected: reading.alcohol != 0,
            button_pressed: reading.button != 0,
            accelerometer: Axes {
                x: motion[0],
                y: motion[1],
                z: motion[2],
            },
            gyroscope: Axes {
                x: motion[3],
                y: motion[4],
                z: motion[5],
            },
        })
    }
}

/// Deterministic document id for a queue message identity
pub fn message_document_id(message_id: &str) -> Uuid {
    Uuid::new_v5(&MESSAGE_ID_NAMESPACE, message_id.as_bytes())
}

fn fixed<const N: usize>(field: &'static str, values: &[f64]) -> Result<[f64; N], BuildError> {
    let array: [f64; N] = values
        .try_into()
        .map_err(|_| BuildError::ShapeMismatch {
            field,
            expected: N,
            found: values.len(),
        })?;

    if array.iter().any(|v| !v.is_finite()) {
        return Err(BuildError::NonFinite { field });
    }

    Ok(array)
}
