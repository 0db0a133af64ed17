//! Rotation metadata extraction using exiftool
//!
//! Phone cameras store portrait video as landscape frames plus a `Rotation`
//! tag in the container. exiftool reports it under the composite `Rotation`
//! tag for QuickTime/MP4 and Matroska alike.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Deserialize a value that could be a string or number into Option<String>
fn deserialize_string_or_number<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct StringOrNumber;
    impl<'de> de::Visitor<'de> for StringOrNumber {
        type Value = Option<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or number")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_none<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_any(StringOrNumber)
}

#[derive(Deserialize)]
struct ExiftoolRotationOutput {
    #[serde(rename = "Rotation", deserialize_with = "deserialize_string_or_number", default)]
    rotation: Option<String>,
}

/// Reads container rotation through a one-shot exiftool call
#[derive(Debug, Clone)]
pub struct ExiftoolRotation {
    exiftool: PathBuf,
}

impl Default for ExiftoolRotation {
    fn default() -> Self {
        Self::new("exiftool")
    }
}

impl ExiftoolRotation {
    pub fn new(exiftool: impl Into<PathBuf>) -> Self {
        Self { exiftool: exiftool.into() }
    }

    /// Rotation in clockwise degrees, normalized to 0/90/180/270.
    /// Files without the tag report 0.
    pub async fn rotation_degrees(&self, locator: &str) -> Result<u32> {
        let output = Command::new(&self.exiftool)
            .args(["-json", "-n", "-fast", "-Rotation"])
            .arg(locator)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run exiftool on {}", locator))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("exiftool failed for {}: {}", locator, stderr.trim());
        }

        parse_rotation_json(&output.stdout)
            .with_context(|| format!("Failed to parse exiftool rotation for {}", locator))
    }
}

fn parse_rotation_json(json: &[u8]) -> Result<u32> {
    let records: Vec<ExiftoolRotationOutput> = serde_json::from_slice(json)?;
    let degrees = records
        .into_iter()
        .next()
        .and_then(|r| r.rotation)
        .and_then(|r| r.trim().parse::<f64>().ok())
        .map(|r| r.round() as i64)
        .unwrap_or(0);
    Ok(normalize_rotation(degrees))
}

/// Map any integer angle onto 0/90/180/270, snapping to the nearest quarter turn.
pub fn normalize_rotation(degrees: i64) -> u32 {
    let wrapped = degrees.rem_euclid(360);
    let quarter = ((wrapped + 45) / 90) % 4;
    (quarter * 90) as u32
}
