use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Límite de ganancia por banda (dB)
pub const EQ_GAIN_LIMIT: i32 = 20;

const BASS_BOOST_FILTER: &str = "equalizer=f=40:width_type=h:width=50:g=10";

/// Bandas del ecualizador de tres vías
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EqBand {
    Low,
    Mid,
    High,
}

impl EqBand {
    /// Frecuencia central y ancho (Hz) del filtro de ffmpeg
    fn shape(self) -> (u32, u32) {
        match self {
            EqBand::Low => (100, 200),
            EqBand::Mid => (1000, 1500),
            EqBand::High => (8000, 3000),
        }
    }
}

impl FromStr for EqBand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" | "bass" => Ok(EqBand::Low),
            "mid" => Ok(EqBand::Mid),
            "high" | "treble" => Ok(EqBand::High),
            other => Err(format!("Banda '{}' no válida (low, mid, high)", other)),
        }
    }
}

impl fmt::Display for EqBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EqBand::Low => write!(f, "low"),
            EqBand::Mid => write!(f, "mid"),
            EqBand::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EqGains {
    #[serde(default)]
    pub low: i32,
    #[serde(default)]
    pub mid: i32,
    #[serde(default)]
    pub high: i32,
}

impl EqGains {
    pub fn get(&self, band: EqBand) -> i32 {
        match band {
            EqBand::Low => self.low,
            EqBand::Mid => self.mid,
            EqBand::High => self.high,
        }
    }

    pub fn set(&mut self, band: EqBand, gain: i32) {
        let gain = gain.clamp(-EQ_GAIN_LIMIT, EQ_GAIN_LIMIT);
        match band {
            EqBand::Low => self.low = gain,
            EqBand::Mid => self.mid = gain,
            EqBand::High => self.high = gain,
        }
    }
}

/// Configuración de filtros aplicada al pipeline de decodificación
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub bass_boost: bool,
    #[serde(default)]
    pub eq_gains: EqGains,
}

impl FilterConfig {
    /// Cadena de filtros para `-af`; vacía si no hay nada que aplicar
    pub fn ffmpeg_chain(&self) -> Vec<String> {
        let mut filters = Vec::new();

        if self.bass_boost {
            filters.push(BASS_BOOST_FILTER.to_string());
        }

        for band in [EqBand::Low, EqBand::Mid, EqBand::High] {
            let gain = self.eq_gains.get(band);
            if gain != 0 {
                let (freq, width) = band.shape();
                filters.push(format!(
                    "equalizer=f={}:width_type=h:width={}:g={}",
                    freq, width, gain
                ));
            }
        }

        filters
    }
}
