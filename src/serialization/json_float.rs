//! `f64` fields that stay readable in JSON even when not finite.
//!
//! Finite values are plain JSON numbers. NaN and the infinities, which
//! `serde_json` would otherwise write as `null`, become the strings `"NaN"`,
//! `"inf"` and `"-inf"`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum Encoded {
    Number(f64),
    Text(String),
}

fn encode(value: f64) -> Encoded {
    if value.is_finite() {
        Encoded::Number(value)
    } else if value.is_nan() {
        Encoded::Text("NaN".to_string())
    } else if value > 0.0 {
        Encoded::Text("inf".to_string())
    } else {
        Encoded::Text("-inf".to_string())
    }
}

fn decode<E: serde::de::Error>(encoded: Encoded) -> Result<f64, E> {
    match encoded {
        Encoded::Number(value) => Ok(value),
        Encoded::Text(text) => match text.as_str() {
            "NaN" => Ok(f64::NAN),
            "inf" => Ok(f64::INFINITY),
            "-inf" => Ok(f64::NEG_INFINITY),
            other => Err(E::custom(format!(
                "expected a number, \"NaN\", \"inf\" or \"-inf\", got \"{}\"",
                other
            ))),
        },
    }
}

/// For `Option<f64>` fields. Pair with `#[serde(default)]`.
pub(crate) mod option {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        value.map(encode).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        Option::<Encoded>::deserialize(deserializer)?
            .map(decode::<D::Error>)
            .transpose()
    }
}

/// For `BTreeMap<String, f64>` fields.
pub(crate) mod map {
    use super::*;
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        value: &BTreeMap<String, f64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let encoded: BTreeMap<&str, Encoded> = value
            .iter()
            .map(|(key, &v)| (key.as_str(), encode(v)))
            .collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, f64>, D::Error> {
        BTreeMap::<String, Encoded>::deserialize(deserializer)?
            .into_iter()
            .map(|(key, encoded)| Ok((key, decode::<D::Error>(encoded)?)))
            .collect()
    }
}
