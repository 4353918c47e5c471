//! Repeater metadata sent to the sync source after each election.

/// Modules a repeater may report frequencies for.
pub const MODULES: [&str; 8] = ["A", "B", "C", "D", "AD", "BD", "CD", "DD"];

const DESCRIPTION_WIDTH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RangeUnit {
    #[default]
    Mile,
    Meter,
    Kilometer,
}

impl RangeUnit {
    /// Unknown names fall back to miles.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "meter" | "meters" => Self::Meter,
            "km" | "kilometer" => Self::Kilometer,
            _ => Self::Mile,
        }
    }

    fn to_miles(self, range: f64) -> f64 {
        match self {
            Self::Mile => range,
            Self::Meter => range / 1609.344,
            Self::Kilometer => range / 1.609344,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeightUnit {
    #[default]
    Meter,
    Feet,
}

impl HeightUnit {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "feet" | "foot" => Self::Feet,
            _ => Self::Meter,
        }
    }

    fn to_meters(self, height: f64) -> f64 {
        match self {
            Self::Meter => height,
            Self::Feet => height * 0.3048,
        }
    }
}

/// Radio parameters of one module.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ModuleFrequency {
    pub frequency: f64,
    pub duplex_shift: f64,
    pub range: f64,
    pub antenna_height: f64,
}

/// Raw repeater metadata as configured.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RepeaterInfo {
    pub latitude: f64,
    pub longitude: f64,
    pub description1: String,
    pub description2: String,
    pub range_unit: RangeUnit,
    pub height_unit: HeightUnit,
    /// Indexed like [`MODULES`]
    pub modules: [ModuleFrequency; 8],
    pub info_url: String,
}

/// Preformatted announcement bodies, without the `IRCDDB ` marker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Announcement {
    pub location: Option<String>,
    pub frequencies: Vec<String>,
    pub url: Option<String>,
}

impl Announcement {
    /// Location and frequencies are only reported for a repeater with a position.
    pub fn from_info(info: &RepeaterInfo) -> Self {
        let mut announcement = Self {
            url: Some(printable(&info.info_url)).filter(|u| !u.is_empty()),
            ..Self::default()
        };

        if info.latitude == 0.0 && info.longitude == 0.0 {
            return announcement;
        }

        announcement.location = Some(format!(
            "{:+09.5} {:+010.5} {} {}",
            info.latitude,
            info.longitude,
            description(&info.description1),
            description(&info.description2),
        ));

        announcement.frequencies = MODULES
            .iter()
            .zip(info.modules.iter())
            .filter(|(_, m)| m.frequency > 1.0 && m.range > 0.0)
            .map(|(name, m)| {
                format!(
                    "{} {:011.5} {:+010.5} {:06.2} {:06.1}",
                    name,
                    m.frequency,
                    m.duplex_shift,
                    info.range_unit.to_miles(m.range),
                    info.height_unit.to_meters(m.antenna_height),
                )
            })
            .collect();

        announcement
    }

    /// Message bodies in send order.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(location) = &self.location {
            lines.push(format!("IRCDDB QTH: {}", location));
        }
        for qrg in &self.frequencies {
            lines.push(format!("IRCDDB QRG: {}", qrg));
        }
        if let Some(url) = &self.url {
            lines.push(format!("IRCDDB URL: {}", url));
        }
        lines
    }
}

/// Sanitize, pad or cut to 20 characters, spaces become `_`.
fn description(raw: &str) -> String {
    let kept: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || " +&(),./'-".contains(*c))
        .collect();
    format!("{:<width$.width$}", kept, width = DESCRIPTION_WIDTH).replace(' ', "_")
}

fn printable(raw: &str) -> String {
    raw.trim().chars().filter(|c| c.is_ascii_graphic()).collect()
}
