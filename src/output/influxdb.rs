//! InfluxDB line protocol output formatter.

use crate::output::OutputFormatter;
use crate::state::DeviceState;
use crate::units::DisplayUnit;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Field values for InfluxDB line protocol
#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Integer(num) => write!(f, "{num}i"),
            FieldValue::Boolean(b) => write!(f, "{b}"),
        }
    }
}

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<&'static str, String>,
    pub field_set: BTreeMap<&'static str, FieldValue>,
    pub timestamp: Option<SystemTime>,
}

impl fmt::Display for DataPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.measurement)?;
        for (key, value) in &self.tag_set {
            write!(f, ",{key}={value}")?;
        }

        let mut separator = " ";
        for (key, value) in &self.field_set {
            write!(f, "{separator}{key}={value}")?;
            separator = ",";
        }

        if let Some(nanos) = self
            .timestamp
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
        {
            write!(f, " {nanos}")?;
        }
        Ok(())
    }
}

/// InfluxDB line protocol formatter.
///
/// Tags identify the scale (`mac`, `family`) and its units; fields carry
/// the reading. A scale that went silent only reports `available=false`
/// since its other values are stale.
pub struct InfluxDbFormatter {
    measurement_name: String,
}

impl InfluxDbFormatter {
    pub fn new(measurement_name: String) -> Self {
        Self { measurement_name }
    }

    fn tag_set(state: &DeviceState, unit: DisplayUnit) -> BTreeMap<&'static str, String> {
        let mut tags = BTreeMap::new();
        tags.insert("mac", state.address.to_string());
        tags.insert("family", state.family.to_string());
        if state.available {
            tags.insert("native_unit", state.reading.unit.to_string());
            tags.insert("unit", unit.symbol().to_string());
        }
        tags
    }

    fn field_set(state: &DeviceState, unit: DisplayUnit) -> BTreeMap<&'static str, FieldValue> {
        let mut fields = BTreeMap::new();
        fields.insert("available", FieldValue::Boolean(state.available));
        if !state.available {
            return fields;
        }

        let grams = state.weight_grams();
        fields.insert("weight", FieldValue::Float(unit.convert(grams)));
        fields.insert("weight_grams", FieldValue::Float(grams));
        fields.insert("raw_weight", FieldValue::Float(state.reading.value()));
        fields.insert("stable", FieldValue::Boolean(state.stable));
        fields.insert("out_of_range", FieldValue::Boolean(state.out_of_range));
        if let Some(battery) = state.battery {
            fields.insert("battery", FieldValue::Integer(i64::from(battery)));
        }
        fields
    }

    fn to_data_point(&self, state: &DeviceState, unit: DisplayUnit) -> DataPoint {
        DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set: Self::tag_set(state, unit),
            field_set: Self::field_set(state, unit),
            timestamp: Some(state.last_seen),
        }
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(&self, state: &DeviceState, unit: DisplayUnit) -> String {
        self.to_data_point(state, unit).to_string()
    }
}
