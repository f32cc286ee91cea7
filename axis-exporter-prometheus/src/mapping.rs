//! Mapping from parsed VAPIX responses to Prometheus observations.
//!
//! Two response shapes are understood:
//!
//! - the parameter listing (`param.cgi?action=list`), which identifies the
//!   device model through `root.Brand.ProdNbr`;
//! - the temperature control status (`temperaturecontrol.cgi?action=statusall`),
//!   with one entry per sensor under `Sensor` and one per heater under `Heater`.

use axis_common::flatkey::{Node, ParsedTree};
use thiserror::Error;

/// Path of the product number in the parameter listing.
pub const PRODUCT_PATH: [&str; 3] = ["root", "Brand", "ProdNbr"];

/// Errors raised when a parsed response does not have the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("missing field '{path}'")]
    MissingField { path: String },

    #[error("'{path}' is a value, expected a section")]
    NotASection { path: String },

    #[error("invalid number at '{path}': {value:?}")]
    InvalidNumber { path: String, value: String },
}

/// Prometheus metric type of an exported family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Summary,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Summary => "summary",
        }
    }
}

/// Static description of an exported metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: MetricKind,
    pub labels: &'static [&'static str],
}

pub const AXIS_TEMP: MetricDescriptor = MetricDescriptor {
    name: "axis_temp",
    help: "Axis Communications camera temperature reading",
    kind: MetricKind::Gauge,
    labels: &["product_name", "node", "sensor_name"],
};

pub const AXIS_HEATER_STATUS: MetricDescriptor = MetricDescriptor {
    name: "axis_heater_status",
    help: "Axis Communications camera heater status: 0=stopped, 1=running, 2=failed",
    kind: MetricKind::Gauge,
    labels: &["product_name", "node", "heater_id"],
};

pub const AXIS_HEATER_TIMER: MetricDescriptor = MetricDescriptor {
    name: "axis_heater_timer",
    help: "Axis Communications camera heater time until stop",
    kind: MetricKind::Gauge,
    labels: &["product_name", "node", "heater_id"],
};

pub const REQUEST_PROCESSING_SECONDS: MetricDescriptor = MetricDescriptor {
    name: "request_processing_seconds",
    help: "Time spent processing request",
    kind: MetricKind::Summary,
    labels: &[],
};

/// Per-device gauge families.
pub static DEVICE_METRICS: [MetricDescriptor; 3] =
    [AXIS_TEMP, AXIS_HEATER_STATUS, AXIS_HEATER_TIMER];

/// Find the descriptor of a known metric family.
pub fn describe(name: &str) -> Option<&'static MetricDescriptor> {
    DEVICE_METRICS
        .iter()
        .chain(std::iter::once(&REQUEST_PROCESSING_SECONDS))
        .find(|d| d.name == name)
}

/// Model identification of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub product_name: String,
}

/// One temperature sensor entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub sensor_name: String,
    pub temperature_fahrenheit: f64,
}

/// Heater state as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaterStatus {
    Stopped,
    Running,
    /// Any other status string, including failure states.
    Unknown,
}

impl HeaterStatus {
    pub fn from_status(status: &str) -> Self {
        match status {
            "Stopped" => HeaterStatus::Stopped,
            "Running" => HeaterStatus::Running,
            _ => HeaterStatus::Unknown,
        }
    }

    /// Gauge encoding: 0=stopped, 1=running, 2=unknown.
    pub fn as_value(self) -> f64 {
        match self {
            HeaterStatus::Stopped => 0.0,
            HeaterStatus::Running => 1.0,
            HeaterStatus::Unknown => 2.0,
        }
    }
}

/// One heater entry, keyed by its id in the status response.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaterReading {
    pub heater_id: String,
    pub status: HeaterStatus,
    pub seconds_until_stop: f64,
}

/// Sensor and heater readings extracted from a status response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusReadings {
    pub sensors: Vec<SensorReading>,
    pub heaters: Vec<HeaterReading>,
}

/// A single gauge value to record in the metrics sink.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricObservation {
    pub name: String,
    /// Label pairs, in the family's declared label order.
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

impl MetricObservation {
    fn new(descriptor: &MetricDescriptor, label_values: [&str; 3], value: f64) -> Self {
        let labels = descriptor
            .labels
            .iter()
            .zip(label_values)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Self {
            name: descriptor.name.to_string(),
            labels,
            value,
        }
    }

    /// Value of a label, if present.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Read the product number from a parameter listing.
pub fn identify_device(tree: &ParsedTree) -> Result<DeviceIdentity, MappingError> {
    let product_name = tree
        .get_value_path(&PRODUCT_PATH)
        .ok_or_else(|| MappingError::MissingField {
            path: PRODUCT_PATH.join("."),
        })?;

    Ok(DeviceIdentity {
        product_name: product_name.to_string(),
    })
}

/// Extract sensor and heater readings from a status response.
///
/// Both sections are required. A malformed entry fails the whole
/// extraction rather than being skipped.
pub fn extract_readings(tree: &ParsedTree) -> Result<StatusReadings, MappingError> {
    let mut readings = StatusReadings::default();

    for (key, entry) in section(tree, "Sensor")?.iter() {
        let path = format!("Sensor.{}", key);
        let entry = entry_tree(entry, &path)?;

        readings.sensors.push(SensorReading {
            sensor_name: field(entry, &path, "Name")?.to_string(),
            temperature_fahrenheit: number(entry, &path, "Fahrenheit")?,
        });
    }

    for (heater_id, entry) in section(tree, "Heater")?.iter() {
        let path = format!("Heater.{}", heater_id);
        let entry = entry_tree(entry, &path)?;

        readings.heaters.push(HeaterReading {
            heater_id: heater_id.to_string(),
            status: HeaterStatus::from_status(field(entry, &path, "Status")?),
            seconds_until_stop: number(entry, &path, "TimeUntilStop")?,
        });
    }

    Ok(readings)
}

/// Build the gauge observations for one device scrape.
pub fn to_observations(
    identity: &DeviceIdentity,
    host: &str,
    readings: &StatusReadings,
) -> Vec<MetricObservation> {
    let product = identity.product_name.as_str();
    let mut observations =
        Vec::with_capacity(readings.sensors.len() + 2 * readings.heaters.len());

    for sensor in &readings.sensors {
        observations.push(MetricObservation::new(
            &AXIS_TEMP,
            [product, host, sensor.sensor_name.as_str()],
            sensor.temperature_fahrenheit,
        ));
    }

    for heater in &readings.heaters {
        let labels = [product, host, heater.heater_id.as_str()];
        observations.push(MetricObservation::new(
            &AXIS_HEATER_STATUS,
            labels,
            heater.status.as_value(),
        ));
        observations.push(MetricObservation::new(
            &AXIS_HEATER_TIMER,
            labels,
            heater.seconds_until_stop,
        ));
    }

    observations
}

fn section<'a>(tree: &'a ParsedTree, name: &str) -> Result<&'a ParsedTree, MappingError> {
    let node = tree.get(name).ok_or_else(|| MappingError::MissingField {
        path: name.to_string(),
    })?;
    entry_tree(node, name)
}

fn entry_tree<'a>(node: &'a Node, path: &str) -> Result<&'a ParsedTree, MappingError> {
    node.as_tree().ok_or_else(|| MappingError::NotASection {
        path: path.to_string(),
    })
}

fn field<'a>(entry: &'a ParsedTree, path: &str, name: &str) -> Result<&'a str, MappingError> {
    entry
        .get(name)
        .and_then(Node::as_value)
        .ok_or_else(|| MappingError::MissingField {
            path: format!("{}.{}", path, name),
        })
}

fn number(entry: &ParsedTree, path: &str, name: &str) -> Result<f64, MappingError> {
    let value = field(entry, path, name)?;
    value.parse().map_err(|_| MappingError::InvalidNumber {
        path: format!("{}.{}", path, name),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axis_common::flatkey::parse;

    const STATUS_ALL: &str = "Sensor.S0.Name=Main
Sensor.S0.Celsius=38.50
Sensor.S0.Fahrenheit=101.30
Sensor.S1.Name=CPU
Sensor.S1.Fahrenheit=123.80
Heater.H0.Status=Stopped
Heater.H0.TimeUntilStop=0
";

    #[test]
    fn test_identify_device() {
        let tree = parse("root.Brand.Brand=AXIS\nroot.Brand.ProdNbr=Q6075-E\n").unwrap();
        let identity = identify_device(&tree).unwrap();

        assert_eq!(identity.product_name, "Q6075-E");
    }

    #[test]
    fn test_identify_device_missing() {
        let tree = parse("root.Brand.Brand=AXIS\n").unwrap();

        assert_eq!(
            identify_device(&tree),
            Err(MappingError::MissingField {
                path: "root.Brand.ProdNbr".to_string()
            })
        );
    }

    #[test]
    fn test_extract_sensors() {
        let tree = parse(STATUS_ALL).unwrap();
        let readings = extract_readings(&tree).unwrap();

        assert_eq!(
            readings.sensors,
            vec![
                SensorReading {
                    sensor_name: "Main".to_string(),
                    temperature_fahrenheit: 101.3,
                },
                SensorReading {
                    sensor_name: "CPU".to_string(),
                    temperature_fahrenheit: 123.8,
                },
            ]
        );
        assert_eq!(readings.heaters.len(), 1);
        assert_eq!(readings.heaters[0].status, HeaterStatus::Stopped);
    }

    #[test]
    fn test_heater_running() {
        let tree = parse(
            "Sensor.S0.Name=Main\nSensor.S0.Fahrenheit=70\nHeater.H1.Status=Running\nHeater.H1.TimeUntilStop=120\n",
        )
        .unwrap();
        let readings = extract_readings(&tree).unwrap();
        let identity = DeviceIdentity {
            product_name: "Q6075-E".to_string(),
        };

        let observations = to_observations(&identity, "cam1", &readings);
        let status = observations
            .iter()
            .find(|o| o.name == "axis_heater_status")
            .unwrap();
        let timer = observations
            .iter()
            .find(|o| o.name == "axis_heater_timer")
            .unwrap();

        assert_eq!(status.label("heater_id"), Some("H1"));
        assert_eq!(status.value, 1.0);
        assert_eq!(timer.label("heater_id"), Some("H1"));
        assert_eq!(timer.value, 120.0);
    }

    #[test]
    fn test_heater_unknown_status() {
        assert_eq!(HeaterStatus::from_status("Jammed"), HeaterStatus::Unknown);
        assert_eq!(HeaterStatus::from_status("running"), HeaterStatus::Unknown);
        assert_eq!(HeaterStatus::from_status("Jammed").as_value(), 2.0);

        let tree = parse(
            "Sensor.S0.Name=Main\nSensor.S0.Fahrenheit=70\nHeater.H2.Status=Jammed\nHeater.H2.TimeUntilStop=0\n",
        )
        .unwrap();
        let readings = extract_readings(&tree).unwrap();
        assert_eq!(readings.heaters[0].heater_id, "H2");
        assert_eq!(readings.heaters[0].status.as_value(), 2.0);
    }

    #[test]
    fn test_missing_sensor_section() {
        let tree = parse("Heater.H0.Status=Stopped\nHeater.H0.TimeUntilStop=0\n").unwrap();

        assert_eq!(
            extract_readings(&tree),
            Err(MappingError::MissingField {
                path: "Sensor".to_string()
            })
        );
    }

    #[test]
    fn test_missing_heater_section() {
        let tree = parse("Sensor.S0.Name=Main\nSensor.S0.Fahrenheit=70\n").unwrap();

        assert!(matches!(
            extract_readings(&tree),
            Err(MappingError::MissingField { path }) if path == "Heater"
        ));
    }

    #[test]
    fn test_section_is_scalar() {
        let tree = parse("Sensor=none\nHeater.H0.Status=Stopped\n").unwrap();

        assert_eq!(
            extract_readings(&tree),
            Err(MappingError::NotASection {
                path: "Sensor".to_string()
            })
        );
    }

    #[test]
    fn test_invalid_temperature_aborts() {
        let tree = parse(
            "Sensor.S0.Name=Main\nSensor.S0.Fahrenheit=n/a\nSensor.S1.Name=CPU\nSensor.S1.Fahrenheit=99\nHeater.H0.Status=Stopped\nHeater.H0.TimeUntilStop=0\n",
        )
        .unwrap();

        assert_eq!(
            extract_readings(&tree),
            Err(MappingError::InvalidNumber {
                path: "Sensor.S0.Fahrenheit".to_string(),
                value: "n/a".to_string(),
            })
        );
    }

    #[test]
    fn test_missing_sensor_name() {
        let tree = parse("Sensor.S0.Fahrenheit=99\nHeater.H0.Status=Stopped\n").unwrap();

        assert_eq!(
            extract_readings(&tree),
            Err(MappingError::MissingField {
                path: "Sensor.S0.Name".to_string()
            })
        );
    }

    #[test]
    fn test_observation_labels() {
        let tree = parse(STATUS_ALL).unwrap();
        let readings = extract_readings(&tree).unwrap();
        let identity = DeviceIdentity {
            product_name: "M3106".to_string(),
        };

        let observations = to_observations(&identity, "10.0.0.5", &readings);

        // Two sensors, one heater with status and timer
        assert_eq!(observations.len(), 4);

        let temps: Vec<_> = observations
            .iter()
            .filter(|o| o.name == "axis_temp")
            .collect();
        assert_eq!(temps.len(), 2);
        assert_ne!(temps[0].label("sensor_name"), temps[1].label("sensor_name"));

        for obs in &observations {
            assert_eq!(obs.label("product_name"), Some("M3106"));
            assert_eq!(obs.label("node"), Some("10.0.0.5"));
        }

        let label_names: Vec<_> = temps[0].labels.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(label_names, vec!["product_name", "node", "sensor_name"]);
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe("axis_temp"), Some(&AXIS_TEMP));
        assert_eq!(
            describe("request_processing_seconds").map(|d| d.kind),
            Some(MetricKind::Summary)
        );
        assert!(describe("unknown").is_none());
    }
}
