//! Derived values computed from decoded sensor readings.
//!
//! [`enrich`] only ever adds fields. A calculated field stays absent when one of
//! its inputs is absent, when an input would put the formula outside its domain
//! (zero acceleration magnitude, zero humidity), or when the result is not a
//! finite number.

use crate::measurement::Measurement;

const PM2_5_MAX: f64 = 60.0;
const CO2_MIN: f64 = 420.0;
const CO2_MAX: f64 = 2300.0;

/// Fill in every calculated field whose inputs are present.
pub fn enrich(m: &mut Measurement) {
    if let (Some(x), Some(y), Some(z)) = (m.acceleration_x, m.acceleration_y, m.acceleration_z) {
        let total = finite((x * x + y * y + z * z).sqrt());
        m.acceleration_total = total;
        if let Some(total) = total.filter(|t| *t != 0.0) {
            m.acceleration_angle_from_x = acceleration_angle(x, total);
            m.acceleration_angle_from_y = acceleration_angle(y, total);
            m.acceleration_angle_from_z = acceleration_angle(z, total);
        }
    }

    let Some(temperature) = m.temperature else {
        m.air_quality_index = air_quality_index(m.pm2_5, m.co2);
        return;
    };

    let vapor_pressure = equilibrium_vapor_pressure(temperature);
    m.equilibrium_vapor_pressure = vapor_pressure;

    if let (Some(humidity), Some(vp)) = (m.humidity, vapor_pressure) {
        m.absolute_humidity = finite(vp * humidity * 0.021674 / (273.15 + temperature));
        m.dew_point = dew_point(humidity, vp);
        if let Some(pressure) = m.pressure {
            m.air_density = air_density(temperature, humidity, pressure, vp);
        }
    }

    m.air_quality_index = air_quality_index(m.pm2_5, m.co2);
}

/// Angle in degrees between an axis and the acceleration vector.
fn acceleration_angle(axis: f64, total: f64) -> Option<f64> {
    finite((axis / total).clamp(-1.0, 1.0).acos().to_degrees())
}

/// Equilibrium vapor pressure of water in Pa (Magnus formula).
pub fn equilibrium_vapor_pressure(temperature: f64) -> Option<f64> {
    finite(611.2 * (17.67 * temperature / (243.5 + temperature)).exp())
}

fn dew_point(humidity: f64, vapor_pressure: f64) -> Option<f64> {
    if humidity == 0.0 {
        return None;
    }
    let v = (humidity / 100.0 * vapor_pressure / 611.2).ln();
    finite(-243.5 * v / (v - 17.67))
}

fn air_density(temperature: f64, humidity: f64, pressure: f64, vapor_pressure: f64) -> Option<f64> {
    finite(
        1.2929 * 273.15 / (temperature + 273.15)
            * (pressure - 0.3783 * humidity / 100.0 * vapor_pressure)
            / 101_300.0,
    )
}

/// Composite air quality score, 100 being the best.
pub fn air_quality_index(pm2_5: Option<f64>, co2: Option<f64>) -> Option<f64> {
    let (pm2_5, co2) = (pm2_5?, co2?);
    let dx = pm2_5.clamp(0.0, PM2_5_MAX) * (100.0 / PM2_5_MAX);
    let dy = (co2.clamp(CO2_MIN, CO2_MAX) - CO2_MIN) * (100.0 / (CO2_MAX - CO2_MIN));
    finite((100.0 - dx.hypot(dy)).clamp(0.0, 100.0))
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}
