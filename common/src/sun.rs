use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use solar_positioning::{spa, time::DeltaT, RefractionCorrection};

use crate::{
    config::SiteConfig,
    error::{ConfigError, EphemerisError},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunPosition {
    /// Degrees clockwise from north.
    pub azimuth: f64,
    /// Degrees from the local vertical.
    pub zenith: f64,
}

pub trait SolarEphemeris {
    fn position(
        &self,
        at: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
        elevation_m: f64,
    ) -> Result<SunPosition, EphemerisError>;
}

/// NREL Solar Position Algorithm with refraction for the site's mean air pressure
/// and temperature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpaEphemeris {
    pub pressure_hpa: f64,
    pub temperature_c: f64,
}

impl Default for SpaEphemeris {
    fn default() -> Self {
        Self {
            pressure_hpa: 1010.0,
            temperature_c: 11.0,
        }
    }
}

impl SolarEphemeris for SpaEphemeris {
    fn position(
        &self,
        at: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
        elevation_m: f64,
    ) -> Result<SunPosition, EphemerisError> {
        let delta_t = DeltaT::estimate_from_date_like(at)
            .map_err(|err| EphemerisError(err.to_string()))?;
        let refraction = RefractionCorrection::new(self.pressure_hpa, self.temperature_c)
            .map_err(|err| EphemerisError(err.to_string()))?;
        let position = spa::solar_position(
            at,
            latitude,
            longitude,
            elevation_m,
            delta_t,
            Some(refraction),
        )
        .map_err(|err| EphemerisError(err.to_string()))?;

        Ok(SunPosition {
            azimuth: position.azimuth(),
            zenith: position.zenith_angle(),
        })
    }
}

/// Decides whether the collectors can harvest at a given instant.
#[derive(Debug, Clone)]
pub struct SunGate<E = SpaEphemeris> {
    site: SiteConfig,
    tz: Tz,
    ephemeris: E,
}

impl SunGate<SpaEphemeris> {
    pub fn new(site: SiteConfig) -> Result<Self, ConfigError> {
        Self::with_ephemeris(site, SpaEphemeris::default())
    }
}

impl<E: SolarEphemeris> SunGate<E> {
    pub fn with_ephemeris(site: SiteConfig, ephemeris: E) -> Result<Self, ConfigError> {
        let tz = site.tz()?;
        Ok(Self {
            site,
            tz,
            ephemeris,
        })
    }

    pub fn position(&self, at: DateTime<Utc>) -> Result<SunPosition, EphemerisError> {
        self.ephemeris.position(
            at,
            self.site.latitude,
            self.site.longitude,
            self.site.elevation_m,
        )
    }

    pub fn max_zenith_at(&self, at: DateTime<Utc>) -> f64 {
        let local_hour = at.with_timezone(&self.tz).hour();
        match self.site.afternoon_max_zenith {
            Some(afternoon) if local_hour >= 12 => afternoon,
            _ => self.site.max_zenith,
        }
    }

    pub fn shining(&self, at: DateTime<Utc>) -> Result<bool, EphemerisError> {
        Ok(self.shining_at(self.position(at)?, at))
    }

    /// Strict bounds: a sun exactly on the window edge does not count.
    pub fn shining_at(&self, position: SunPosition, at: DateTime<Utc>) -> bool {
        position.azimuth > self.site.min_azimuth
            && position.azimuth < self.site.max_azimuth
            && position.zenith < self.max_zenith_at(at)
    }
}
