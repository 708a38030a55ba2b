//! Published parameter-fit rows.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::ModelParams;
use crate::model::ModelVariant;
use crate::region::RegionKey;

/// One region's fitted parameters, as published after a run and read back
/// as a warm start by the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterFitRow {
    #[serde(flatten)]
    pub region: RegionKey,
    #[serde(rename = "Data Start Date")]
    pub data_start: NaiveDate,
    #[serde(rename = "MAPE")]
    pub mape: f64,
    #[serde(rename = "Infection Rate")]
    pub infection_rate: f64,
    #[serde(rename = "Median Day of Action")]
    pub median_day_of_action: f64,
    #[serde(rename = "Rate of Action")]
    pub rate_of_action: f64,
    #[serde(rename = "Rate of Death")]
    pub rate_of_death: f64,
    #[serde(rename = "Mortality Rate")]
    pub mortality_rate: f64,
    #[serde(rename = "Rate of Mortality Rate Decay")]
    pub mortality_decay: f64,
    #[serde(rename = "Internal Parameter 1")]
    pub internal_1: f64,
    #[serde(rename = "Internal Parameter 2")]
    pub internal_2: f64,
    #[serde(rename = "Jump Magnitude")]
    pub jump_magnitude: f64,
    #[serde(rename = "Jump Time")]
    pub jump_time: f64,
    #[serde(rename = "Jump Decay")]
    pub jump_decay: f64,
    #[serde(
        rename = "Initial State Correction",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub initial_state_correction: Option<f64>,
}

impl ParameterFitRow {
    pub fn new(
        region: RegionKey,
        data_start: NaiveDate,
        mape: f64,
        params: &ModelParams,
        variant: ModelVariant,
    ) -> Self {
        Self {
            region,
            data_start,
            mape,
            infection_rate: params.alpha,
            median_day_of_action: params.days,
            rate_of_action: params.r_s,
            rate_of_death: params.r_dth,
            mortality_rate: params.p_dth,
            mortality_decay: params.r_dthdecay,
            internal_1: params.k1,
            internal_2: params.k2,
            jump_magnitude: params.jump,
            jump_time: params.t_jump,
            jump_decay: params.std_normal,
            initial_state_correction: match variant {
                ModelVariant::Base => None,
                ModelVariant::InitialStateCorrection => Some(params.k3),
            },
        }
    }

    pub fn params(&self) -> ModelParams {
        ModelParams {
            alpha: self.infection_rate,
            days: self.median_day_of_action,
            r_s: self.rate_of_action,
            r_dth: self.rate_of_death,
            p_dth: self.mortality_rate,
            r_dthdecay: self.mortality_decay,
            k1: self.internal_1,
            k2: self.internal_2,
            jump: self.jump_magnitude,
            t_jump: self.jump_time,
            std_normal: self.jump_decay,
            k3: self.initial_state_correction.unwrap_or(1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_names_round_trip() {
        let row = ParameterFitRow::new(
            RegionKey::new("North America", "US", "Texas"),
            NaiveDate::from_ymd_opt(2020, 3, 12).unwrap(),
            4.2,
            &ModelParams::default(),
            ModelVariant::Base,
        );
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["Province"], "Texas");
        assert_eq!(json["Data Start Date"], "2020-03-12");
        assert_eq!(json["Infection Rate"], 1.0);
        assert!(json.get("Initial State Correction").is_none());

        let back: ParameterFitRow = serde_json::from_value(json).unwrap();
        assert_eq!(back.params(), ModelParams::default());
    }
}
