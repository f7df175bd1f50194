// cf-core/src/units.rs

use uom::si::f64::{ThermodynamicTemperature as UomThermodynamicTemperature, Time as UomTime};

// Public canonical unit types (SI, f64)
pub type Temperature = UomThermodynamicTemperature;
pub type Time = UomTime;

#[inline]
pub fn k(v: f64) -> Temperature {
    use uom::si::thermodynamic_temperature::kelvin;
    Temperature::new::<kelvin>(v)
}

#[inline]
pub fn kelvin_of(t: Temperature) -> f64 {
    use uom::si::thermodynamic_temperature::kelvin;
    t.get::<kelvin>()
}

#[inline]
pub fn s(v: f64) -> Time {
    use uom::si::time::second;
    Time::new::<second>(v)
}

#[inline]
pub fn gyr(v: f64) -> Time {
    s(v * constants::GYR_S)
}

#[inline]
pub fn gyr_of(t: Time) -> f64 {
    use uom::si::time::second;
    t.get::<second>() / constants::GYR_S
}

pub mod constants {
    /// Speed of light [km/s]
    pub const C_KM_S: f64 = 299_792.458;
    /// Speed of light [m/s]
    pub const C_M_S: f64 = 2.997_924_58e8;
    /// Megaparsec [m]
    pub const MPC_M: f64 = 3.085_677_581_282e22;
    /// Gigayear [s]
    pub const GYR_S: f64 = 3.155_692_597_47e16;
    /// Newton constant [m^3 / (kg s^2)]
    pub const G_SI: f64 = 6.674_28e-11;
    /// Proton mass [kg]
    pub const M_P_KG: f64 = 1.672_621_637e-27;
    /// Thomson cross-section [m^2]
    pub const SIGMA_T_M2: f64 = 6.652_462e-29;
    /// Boltzmann constant [J/K]
    pub const K_B: f64 = 1.380_650_4e-23;
    /// Planck constant [J s]
    pub const H_PLANCK: f64 = 6.626_069_57e-34;
    /// Radiation constant [J / (m^3 K^4)]
    pub const A_RAD: f64 = 7.565_914e-16;
    /// Helium-to-hydrogen mass ratio used for the number fraction.
    pub const NOT4: f64 = 3.9715;
    /// Photon density today for T_cmb = 2.7255 K, times h^2.
    pub const OMEGA_G_H2_REF: f64 = 2.473e-5;
    pub const T_CMB_REF: f64 = 2.7255;
    /// Neutrino mass sum giving omega_nu = 1 [eV].
    pub const NCDM_EV_PER_OMEGA: f64 = 93.14;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_round_trip() {
        assert!((kelvin_of(k(2.7255)) - 2.7255).abs() < 1e-12);
        assert!((gyr_of(gyr(13.8)) - 13.8).abs() < 1e-12);
    }
}
