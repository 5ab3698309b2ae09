//! Link budget calculations
//!
//! Free-space path loss with simplified additive loss terms. The loss
//! constants are approximations, not physically derived values.

use serde::{Deserialize, Serialize};

/// Speed of light in m/s
pub const SPEED_OF_LIGHT_M_S: f64 = 299_792_458.0;

/// Additive loss model applied on top of free-space path loss
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalModel {
    #[default]
    FreeSpace,
    Atmospheric,
    Ionospheric,
}

/// Radio link parameters for received-power estimates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Transmit power in dBm
    pub tx_power_dbm: f64,
    /// Antenna gain in dBi
    pub antenna_gain_dbi: f64,
    /// Carrier frequency in MHz
    pub frequency_mhz: f64,
    /// Receiver noise floor in dBm, used for SINR
    pub noise_floor_dbm: f64,
    /// Minimum usable signal in dBm, used for link margin
    pub min_signal_dbm: f64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            tx_power_dbm: 30.0,
            antenna_gain_dbi: 0.0,
            frequency_mhz: 2000.0,
            noise_floor_dbm: -120.0,
            min_signal_dbm: -110.0,
        }
    }
}

/// Link metrics at one distance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkBudget {
    pub path_loss_db: f64,
    pub signal_strength_dbm: f64,
    pub sinr_db: f64,
    pub link_margin_db: f64,
}

/// Free space path loss in dB
/// Formula: FSPL = 20*log10(d_m) + 20*log10(f_hz) + 20*log10(4π/c)
pub fn free_space_path_loss_db(distance_km: f64, frequency_mhz: f64) -> f64 {
    let d_m = distance_km * 1000.0;
    let f_hz = frequency_mhz * 1.0e6;
    20.0 * d_m.log10()
        + 20.0 * f_hz.log10()
        + 20.0 * (4.0 * std::f64::consts::PI / SPEED_OF_LIGHT_M_S).log10()
}

/// Extra loss for the selected model
pub fn additional_loss_db(distance_km: f64, frequency_mhz: f64, model: SignalModel) -> f64 {
    match model {
        SignalModel::FreeSpace => 0.0,
        SignalModel::Atmospheric => {
            if distance_km > 500.0 {
                2.0
            } else {
                0.1 * distance_km
            }
        }
        SignalModel::Ionospheric => {
            if frequency_mhz < 1000.0 {
                3.0
            } else {
                1.0
            }
        }
    }
}

/// Received signal strength in dBm, `-inf` for a non-positive distance
pub fn signal_strength(
    distance_km: f64,
    tx_power_dbm: f64,
    antenna_gain_dbi: f64,
    frequency_mhz: f64,
    model: SignalModel,
) -> f64 {
    if distance_km <= 0.0 || distance_km.is_nan() {
        return f64::NEG_INFINITY;
    }
    let loss = free_space_path_loss_db(distance_km, frequency_mhz)
        + additional_loss_db(distance_km, frequency_mhz, model);
    tx_power_dbm + antenna_gain_dbi - loss
}

impl RadioConfig {
    /// RSRP at `distance_km` on `frequency_mhz`
    pub fn rsrp_dbm(&self, distance_km: f64, frequency_mhz: f64, model: SignalModel) -> f64 {
        signal_strength(
            distance_km,
            self.tx_power_dbm,
            self.antenna_gain_dbi,
            frequency_mhz,
            model,
        )
    }

    /// Full budget on the configured carrier
    pub fn link_budget(&self, distance_km: f64, model: SignalModel) -> LinkBudget {
        let signal_strength_dbm = self.rsrp_dbm(distance_km, self.frequency_mhz, model);
        LinkBudget {
            path_loss_db: self.tx_power_dbm + self.antenna_gain_dbi - signal_strength_dbm,
            signal_strength_dbm,
            sinr_db: signal_strength_dbm - self.noise_floor_dbm,
            link_margin_db: signal_strength_dbm - self.min_signal_dbm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_loss_calculation() {
        // Expected: 20*log10(1000) + 20*log10(2400) + 32.45 ≈ 160 dB
        let path_loss = free_space_path_loss_db(1000.0, 2400.0);
        assert!((path_loss - 160.05).abs() < 0.05, "Path loss incorrect: {}", path_loss);
    }

    #[test]
    fn test_path_loss_matches_km_mhz_shortcut() {
        for (d, f) in [(550.0, 2000.0), (1200.0, 12000.0), (35786.0, 11700.0)] {
            let shortcut: f64 = 20.0 * f64::log10(d) + 20.0 * f64::log10(f) + 32.45;
            let exact = free_space_path_loss_db(d, f);
            assert!((shortcut - exact).abs() < 0.01, "{} vs {}", shortcut, exact);
        }
    }

    #[test]
    fn test_signal_strength_non_positive_distance() {
        assert_eq!(
            signal_strength(0.0, 30.0, 0.0, 2000.0, SignalModel::FreeSpace),
            f64::NEG_INFINITY
        );
        assert_eq!(
            signal_strength(-5.0, 30.0, 0.0, 2000.0, SignalModel::Atmospheric),
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn test_signal_strength_varies_with_distance() {
        let near = signal_strength(500.0, 30.0, 0.0, 2000.0, SignalModel::FreeSpace);
        let far = signal_strength(1000.0, 30.0, 0.0, 2000.0, SignalModel::FreeSpace);
        // Doubling the distance costs 6 dB
        assert!((near - far - 6.0206).abs() < 1e-3);
    }

    #[test]
    fn test_atmospheric_loss_term() {
        assert!((additional_loss_db(100.0, 2000.0, SignalModel::Atmospheric) - 10.0).abs() < 1e-12);
        assert_eq!(additional_loss_db(800.0, 2000.0, SignalModel::Atmospheric), 2.0);
        let fs = signal_strength(800.0, 30.0, 0.0, 2000.0, SignalModel::FreeSpace);
        let atm = signal_strength(800.0, 30.0, 0.0, 2000.0, SignalModel::Atmospheric);
        assert!((fs - atm - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_ionospheric_loss_term() {
        assert_eq!(additional_loss_db(800.0, 400.0, SignalModel::Ionospheric), 3.0);
        assert_eq!(additional_loss_db(800.0, 12000.0, SignalModel::Ionospheric), 1.0);
    }

    #[test]
    fn test_link_budget_consistency() {
        let radio = RadioConfig::default();
        let budget = radio.link_budget(600.0, SignalModel::FreeSpace);
        assert!((budget.signal_strength_dbm - (30.0 - budget.path_loss_db)).abs() < 1e-9);
        assert!((budget.sinr_db - (budget.signal_strength_dbm + 120.0)).abs() < 1e-9);
        assert!((budget.link_margin_db - (budget.signal_strength_dbm + 110.0)).abs() < 1e-9);
    }
}
