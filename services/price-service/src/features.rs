//! House features and their canonical positional order.
//!
//! The model reads positions, not names. `HouseFeatures::ordered` is the only
//! place names are mapped to positions and must stay in step with
//! `FEATURE_NAMES`.

use crate::error::FeatureError;
use serde::{Deserialize, Serialize};

pub const FEATURE_COUNT: usize = 18;

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "bedrooms", "bathrooms", "sqft_living", "sqft_lot", "floors",
    "waterfront", "view", "condition", "grade", "sqft_above", "sqft_basement",
    "yr_built", "yr_renovated", "zipcode", "lat", "long", "sqft_living15", "sqft_lot15",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HouseFeatures {
    pub bedrooms: f64,
    pub bathrooms: f64,
    pub sqft_living: f64,
    pub sqft_lot: f64,
    pub floors: f64,
    pub waterfront: f64,
    pub view: f64,
    pub condition: f64,
    pub grade: f64,
    pub sqft_above: f64,
    pub sqft_basement: f64,
    pub yr_built: f64,
    pub yr_renovated: f64,
    pub zipcode: f64,
    pub lat: f64,
    pub long: f64,
    pub sqft_living15: f64,
    pub sqft_lot15: f64,
}

impl HouseFeatures {
    pub fn ordered(&self) -> FeatureVector {
        FeatureVector([
            self.bedrooms, self.bathrooms, self.sqft_living, self.sqft_lot, self.floors,
            self.waterfront, self.view, self.condition, self.grade, self.sqft_above,
            self.sqft_basement, self.yr_built, self.yr_renovated, self.zipcode,
            self.lat, self.long, self.sqft_living15, self.sqft_lot15,
        ])
    }
}

/// Exactly `FEATURE_COUNT` values in canonical order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn new(values: [f64; FEATURE_COUNT]) -> Self { Self(values) }

    pub fn from_slice(values: &[f64]) -> Result<Self, FeatureError> {
        let arr: [f64; FEATURE_COUNT] = values
            .try_into()
            .map_err(|_| FeatureError::Length { expected: FEATURE_COUNT, actual: values.len() })?;
        Ok(Self(arr))
    }

    pub fn as_slice(&self) -> &[f64] { &self.0 }

    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES.iter().position(|n| *n == name).map(|i| self.0[i])
    }
}

impl From<HouseFeatures> for FeatureVector {
    fn from(h: HouseFeatures) -> Self { h.ordered() }
}

/// Request body shape: named fields, or a bare positional array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FeaturesPayload {
    Named(HouseFeatures),
    Positional(Vec<f64>),
}

impl TryFrom<FeaturesPayload> for FeatureVector {
    type Error = FeatureError;

    fn try_from(p: FeaturesPayload) -> Result<Self, Self::Error> {
        match p {
            FeaturesPayload::Named(h) => Ok(h.ordered()),
            FeaturesPayload::Positional(v) => FeatureVector::from_slice(&v),
        }
    }
}
