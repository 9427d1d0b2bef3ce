//! `metric@v1`: `{label, value, unit?, precision?}` -> `label: value unit`

use serde::Deserialize;
use serde_json::{Number, Value};

use super::{schema, ArtifactInput, DecodeError, DecoderKey, FormatDecoder};
use crate::pandoc;
use crate::tree::Kind;

const MAX_PRECISION: u32 = 12;

#[derive(Debug, Deserialize)]
struct MetricPayload {
    label: String,
    value: Number,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    precision: Option<u32>,
}

pub struct MetricV1;

/// Integers print as integers; floats print in shortest round-trip form
/// unless a precision is given.
pub fn format_value(value: &Number, precision: Option<u32>) -> String {
    match precision {
        Some(p) => {
            let f = value.as_f64().unwrap_or_default();
            format!("{:.*}", p as usize, f)
        }
        None => {
            if let Some(i) = value.as_i64() {
                i.to_string()
            } else if let Some(u) = value.as_u64() {
                u.to_string()
            } else {
                value.as_f64().map(|f| f.to_string()).unwrap_or_else(|| value.to_string())
            }
        }
    }
}

impl FormatDecoder for MetricV1 {
    fn key(&self) -> DecoderKey {
        DecoderKey::new(Kind::Metric, "metric", "v1")
    }

    fn decode(&self, input: &ArtifactInput<'_>) -> Result<Value, DecodeError> {
        let payload: MetricPayload = serde_json::from_slice(input.bytes)?;

        let label = payload.label.trim();
        if label.is_empty() {
            return Err(schema("metric.label must be a non-empty string"));
        }
        if let Some(p) = payload.precision {
            if p > MAX_PRECISION {
                return Err(schema(format!(
                    "metric.precision must be at most {MAX_PRECISION}, got {p}"
                )));
            }
        }

        let unit = match payload.unit.as_deref().map(str::trim) {
            Some("") => return Err(schema("metric.unit must be non-empty when present")),
            unit => unit,
        };

        let mut text = format!("{label}: {}", format_value(&payload.value, payload.precision));
        if let Some(unit) = unit {
            text.push(' ');
            text.push_str(unit);
        }

        let attr = pandoc::attr("", &["metric"], &[("data-id", input.id)]);
        Ok(pandoc::para(vec![pandoc::span(attr, pandoc::inlines_from_text(&text))]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::DecodeOptions;

    fn decode(bytes: &str) -> Result<Value, DecodeError> {
        let options = DecodeOptions::default();
        MetricV1.decode(&ArtifactInput {
            id: "metric.x.v1",
            bytes: bytes.as_bytes(),
            sidecar: None,
            target: "m.json",
            options: &options,
        })
    }

    fn rendered(fragment: &Value) -> String {
        let inlines = fragment["c"][0]["c"][1].as_array().unwrap();
        inlines
            .iter()
            .map(|i| i["c"].as_str().unwrap_or(" "))
            .collect()
    }

    #[test]
    fn renders_label_value_unit() {
        let fragment = decode(r#"{"label": "Yaw MAE", "value": 1.25, "unit": "deg"}"#).unwrap();
        assert_eq!(rendered(&fragment), "Yaw MAE: 1.25 deg");
        assert_eq!(fragment["c"][0]["c"][0][2][0][1], "metric.x.v1");
    }

    #[test]
    fn precision_controls_digits() {
        let fragment = decode(r#"{"label": "Acc", "value": 0.96712, "unit": "%", "precision": 2}"#).unwrap();
        assert_eq!(rendered(&fragment), "Acc: 0.97 %");
    }

    #[test]
    fn no_precision_means_no_truncation() {
        assert_eq!(format_value(&Number::from_f64(0.123456789).unwrap(), None), "0.123456789");
        assert_eq!(format_value(&Number::from(42), None), "42");
        assert_eq!(format_value(&Number::from(42), Some(1)), "42.0");
    }

    #[test]
    fn unit_is_optional() {
        let fragment = decode(r#"{"label": "Count", "value": 7}"#).unwrap();
        assert_eq!(rendered(&fragment), "Count: 7");
    }

    #[test]
    fn rejects_bad_payloads() {
        assert!(matches!(decode(r#"{"label": "", "value": 1}"#), Err(DecodeError::Schema(_))));
        assert!(matches!(
            decode(r#"{"label": "x", "value": 1, "unit": " "}"#),
            Err(DecodeError::Schema(_))
        ));
        assert!(matches!(decode(r#"{"label": "x", "value": "1"}"#), Err(DecodeError::Json(_))));
        assert!(matches!(decode(r#"{"value": 1}"#), Err(DecodeError::Json(_))));
        assert!(matches!(decode("not json"), Err(DecodeError::Json(_))));
        assert!(matches!(
            decode(r#"{"label": "x", "value": 1, "precision": 40}"#),
            Err(DecodeError::Schema(_))
        ));
    }
}
