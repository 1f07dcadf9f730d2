//! Job configuration: the mixture to deposit and the protocol settings.
//!
//! The form layer edits a [`Configuration`]; this crate only validates it and
//! turns it into the text payload the server expects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEPOSITION_VELOCITY: &str = "deposition_velocity";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("at least one mixture ratio must be nonzero")]
    AllRatiosZero,
    #[error("server offers no component named {0:?}")]
    UnknownComponent(String),
    #[error("expected NAME=VALUE, got {0:?}")]
    MalformedAssignment(String),
    #[error("invalid number {value:?} for {key}")]
    InvalidNumber { key: String, value: String },
}

/// Bounds and display hints for one numeric protocol setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SettingRange {
    pub default: f64,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub dec_places: Option<u16>,
    #[serde(default)]
    pub increment: Option<f64>,
    #[serde(default)]
    pub display_units: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl SettingRange {
    /// A range that accepts any finite value.
    pub fn unbounded(default: f64) -> Self {
        Self {
            default,
            ..Default::default()
        }
    }

    /// Snap to the step (increment, else decimal places) and clamp to the bounds.
    /// Non-finite input falls back to the default.
    pub fn sanitize(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return self.default;
        }
        let step = match (self.increment, self.dec_places) {
            (Some(inc), _) if inc > 0.0 => Some(inc),
            (_, Some(d)) => Some(10f64.powi(-(d as i32))),
            _ => None,
        };
        let mut v = match step {
            Some(step) => (value / step).round() * step,
            None => value,
        };
        if let Some(d) = self.dec_places {
            let scale = 10f64.powi(d as i32);
            v = (v * scale).round() / scale;
        }
        if let Some(min) = self.min {
            if v < min {
                v = min;
            }
        }
        if let Some(max) = self.max {
            if v > max {
                v = max;
            }
        }
        v
    }

    pub fn label<'a>(&'a self, key: &'a str) -> &'a str {
        self.display_name.as_deref().unwrap_or(key)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolSetting {
    pub value: f64,
    pub range: SettingRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixtureComponent {
    pub res_name: String,
    pub ratio: u32,
}

/// A component the server offers, as listed by its components endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub res_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub formula: String,
    #[serde(default)]
    pub smiles: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ComponentCatalog {
    #[serde(default)]
    pub molecules: Vec<ComponentInfo>,
}

impl ComponentCatalog {
    pub fn contains(&self, res_name: &str) -> bool {
        self.molecules.iter().any(|m| m.res_name == res_name)
    }

    pub fn require(&self, res_name: &str) -> Result<&ComponentInfo, ConfigError> {
        self.molecules
            .iter()
            .find(|m| m.res_name == res_name)
            .ok_or_else(|| ConfigError::UnknownComponent(res_name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    mixture: Vec<MixtureComponent>,
    settings: BTreeMap<String, ProtocolSetting>,
}

/// Wire form of a submission: the mixture plus every setting flattened into the top level.
#[derive(Debug, Serialize)]
pub struct Submission<'a> {
    pub mixture: &'a [MixtureComponent],
    #[serde(flatten)]
    pub settings: BTreeMap<&'a str, serde_json::Value>,
}

impl Default for Configuration {
    fn default() -> Self {
        let mut settings = BTreeMap::new();
        settings.insert(
            DEPOSITION_VELOCITY.to_string(),
            ProtocolSetting {
                value: 0.35,
                range: SettingRange {
                    default: 0.35,
                    min: Some(0.10),
                    max: Some(1.00),
                    dec_places: Some(2),
                    increment: None,
                    display_units: Some("nm/ps".to_string()),
                    display_name: Some("Deposition velocity".to_string()),
                },
            },
        );
        Self {
            mixture: Vec::new(),
            settings,
        }
    }
}

impl Configuration {
    /// Default protocol with every offered component at ratio 0.
    pub fn from_catalog(catalog: &ComponentCatalog) -> Self {
        let mut cfg = Self::default();
        cfg.mixture = catalog
            .molecules
            .iter()
            .map(|m| MixtureComponent {
                res_name: m.res_name.clone(),
                ratio: 0,
            })
            .collect();
        cfg
    }

    pub fn mixture(&self) -> &[MixtureComponent] {
        &self.mixture
    }

    pub fn settings(&self) -> &BTreeMap<String, ProtocolSetting> {
        &self.settings
    }

    pub fn setting(&self, key: &str) -> Option<f64> {
        self.settings.get(key).map(|s| s.value)
    }

    /// Set a component's ratio, adding the component if it is not listed yet.
    pub fn set_ratio(&mut self, res_name: &str, ratio: u32) {
        match self.mixture.iter_mut().find(|m| m.res_name == res_name) {
            Some(m) => m.ratio = ratio,
            None => self.mixture.push(MixtureComponent {
                res_name: res_name.to_string(),
                ratio,
            }),
        }
    }

    /// Set a protocol value. Known settings are sanitised against their range;
    /// unknown ones are passed through for the server to sanitise.
    pub fn set_setting(&mut self, key: &str, value: f64) {
        match self.settings.get_mut(key) {
            Some(s) => s.value = s.range.sanitize(value),
            None => {
                self.settings.insert(
                    key.to_string(),
                    ProtocolSetting {
                        value,
                        range: SettingRange::unbounded(value),
                    },
                );
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mixture.iter().all(|m| m.ratio == 0) {
            return Err(ConfigError::AllRatiosZero);
        }
        Ok(())
    }

    pub fn submission(&self) -> Submission<'_> {
        Submission {
            mixture: &self.mixture,
            settings: self
                .settings
                .iter()
                .map(|(k, s)| (k.as_str(), wire_value(s.value)))
                .collect(),
        }
    }

    /// Stable name for files derived from this job.
    ///
    /// Mixture sorted by residue name with ratios reduced by their common
    /// divisor, zero ratios left out, then every setting value in key order.
    pub fn job_name(&self) -> String {
        let mut mixture: Vec<&MixtureComponent> = self.mixture.iter().collect();
        mixture.sort_by(|a, b| a.res_name.cmp(&b.res_name));
        let divisor = mixture
            .iter()
            .fold(0u32, |acc, m| gcd(acc, m.ratio))
            .max(1);

        let mut parts: Vec<String> = mixture
            .iter()
            .filter(|m| m.ratio != 0)
            .map(|m| format!("{}-{}", file_safe(&m.res_name), m.ratio / divisor))
            .collect();
        for s in self.settings.values() {
            parts.push(match s.range.dec_places {
                Some(d) => format!("{:.*}", d as usize, s.value),
                None => format!("{}", s.value),
            });
        }
        parts.join("_")
    }
}

/// Keep a component name usable inside a single file name.
fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '+' => c,
            _ => '_',
        })
        .collect()
}

fn wire_value(v: f64) -> serde_json::Value {
    // Whole numbers go out as integers so integer settings stay integers server-side.
    if v.fract() == 0.0 && v.abs() < (1u64 << 53) as f64 {
        serde_json::Value::from(v as i64)
    } else {
        serde_json::Value::from(v)
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn split_assignment(s: &str) -> Result<(&str, &str), ConfigError> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() && !v.trim().is_empty() => Ok((k.trim(), v.trim())),
        _ => Err(ConfigError::MalformedAssignment(s.to_string())),
    }
}

/// Parse `RES=RATIO`. Fractional ratios are truncated.
pub fn parse_ratio(s: &str) -> Result<(String, u32), ConfigError> {
    let (key, value) = split_assignment(s)?;
    let invalid = || ConfigError::InvalidNumber {
        key: key.to_string(),
        value: value.to_string(),
    };
    let ratio: f64 = value.parse().map_err(|_| invalid())?;
    if !ratio.is_finite() || ratio < 0.0 || ratio > u32::MAX as f64 {
        return Err(invalid());
    }
    Ok((key.to_string(), ratio.trunc() as u32))
}

/// Parse `NAME=VALUE` for a protocol setting.
pub fn parse_setting(s: &str) -> Result<(String, f64), ConfigError> {
    let (key, value) = split_assignment(s)?;
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok((key.to_string(), v)),
        _ => Err(ConfigError::InvalidNumber {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ComponentCatalog {
        serde_json::from_str(
            r#"{"molecules":[
                {"res_name":"TPD","name":"TPD","formula":"C38H32N2","smiles":"c1","atoms":null},
                {"res_name":"AQ4","name":"Alq3","formula":"C27H18AlN3O3","smiles":"c2"}
            ]}"#,
        )
        .unwrap()
    }

    #[test]
    fn catalog_config_starts_all_zero() {
        let cfg = Configuration::from_catalog(&catalog());
        assert_eq!(cfg.mixture().len(), 2);
        assert_eq!(cfg.validate(), Err(ConfigError::AllRatiosZero));
        assert_eq!(Configuration::default().validate(), Err(ConfigError::AllRatiosZero));
    }

    #[test]
    fn settings_are_labelled() {
        let cfg = Configuration::default();
        let (key, setting) = cfg.settings().iter().next().unwrap();
        assert_eq!(key, DEPOSITION_VELOCITY);
        assert_eq!(setting.range.label(key), "Deposition velocity");
        assert_eq!(SettingRange::unbounded(1.0).label("n_cycles"), "n_cycles");
    }

    #[test]
    fn job_name_stays_one_file_name() {
        let mut cfg = Configuration::default();
        cfg.set_ratio("../../etc/x", 1);
        cfg.set_ratio("a\\b", 1);
        let name = cfg.job_name();
        assert_eq!(name, "______etc_x-1_a_b-1_0.35");
        assert!(!name.contains('/') && !name.contains('\\') && !name.contains(".."));
    }

    #[test]
    fn one_nonzero_ratio_is_enough() {
        let mut cfg = Configuration::from_catalog(&catalog());
        cfg.set_ratio("AQ4", 3);
        assert!(cfg.validate().is_ok());
        assert_eq!(catalog().require("AQ4").unwrap().name, "Alq3");
        assert_eq!(
            catalog().require("CBP"),
            Err(ConfigError::UnknownComponent("CBP".to_string()))
        );
    }

    #[test]
    fn submission_flattens_settings() {
        let mut cfg = Configuration::from_catalog(&catalog());
        cfg.set_ratio("TPD", 2);
        cfg.set_setting("n_cycles", 12.0);
        let json: serde_json::Value =
            serde_json::from_str(&crate::codec::encode_submission(&cfg).unwrap()).unwrap();
        assert_eq!(json["mixture"][0]["res_name"], "TPD");
        assert_eq!(json["mixture"][0]["ratio"], 2);
        assert_eq!(json["deposition_velocity"], 0.35);
        assert!(json["n_cycles"].is_u64());
    }

    #[test]
    fn known_settings_are_sanitised() {
        let mut cfg = Configuration::default();
        cfg.set_setting(DEPOSITION_VELOCITY, 5.0);
        assert_eq!(cfg.setting(DEPOSITION_VELOCITY), Some(1.0));
        cfg.set_setting(DEPOSITION_VELOCITY, 0.456);
        assert_eq!(cfg.setting(DEPOSITION_VELOCITY), Some(0.46));
        cfg.set_setting(DEPOSITION_VELOCITY, f64::NAN);
        assert_eq!(cfg.setting(DEPOSITION_VELOCITY), Some(0.35));
    }

    #[test]
    fn increment_snaps_values() {
        let range = SettingRange {
            default: 10.0,
            min: Some(5.0),
            increment: Some(5.0),
            ..Default::default()
        };
        assert_eq!(range.sanitize(12.0), 10.0);
        assert_eq!(range.sanitize(13.0), 15.0);
        assert_eq!(range.sanitize(1.0), 5.0);
    }

    #[test]
    fn job_name_reduces_ratios() {
        let mut cfg = Configuration::from_catalog(&catalog());
        cfg.set_ratio("TPD", 4);
        cfg.set_ratio("AQ4", 2);
        cfg.set_ratio("CBP", 0);
        assert_eq!(cfg.job_name(), "AQ4-1_TPD-2_0.35");
    }

    #[test]
    fn assignments_parse() {
        assert_eq!(parse_ratio("TPD=2.7").unwrap(), ("TPD".to_string(), 2));
        assert_eq!(parse_setting(" n = 1e2 ").unwrap(), ("n".to_string(), 100.0));
        assert!(matches!(
            parse_ratio("TPD"),
            Err(ConfigError::MalformedAssignment(_))
        ));
        assert!(matches!(
            parse_ratio("TPD=-1"),
            Err(ConfigError::InvalidNumber { .. })
        ));
        assert!(parse_setting("v=inf").is_err());
    }
}
