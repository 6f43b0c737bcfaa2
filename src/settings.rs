use log::{info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Clear color of every target.
    #[serde(default = "PipelineSettings::default_background_color")]
    pub background_color: [f32; 3],
    #[serde(default = "PipelineSettings::default_fxaa")]
    pub fxaa: bool,
    /// How strongly the mirror pass shows in the composite, 0..=1.
    #[serde(default = "PipelineSettings::default_reflectiveness")]
    pub reflectiveness: f32,
    /// Strength of the sharpen pass, 0..=1. Zero skips the pass.
    #[serde(default = "PipelineSettings::default_sharpen")]
    pub sharpen: f32,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub present_mode: PresentModeSetting,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            background_color: Self::default_background_color(),
            fxaa: Self::default_fxaa(),
            reflectiveness: Self::default_reflectiveness(),
            sharpen: Self::default_sharpen(),
            resolution: Resolution::default(),
            present_mode: PresentModeSetting::default(),
        }
    }
}

impl PipelineSettings {
    pub fn load() -> Self {
        Self::load_from_path("render_settings.json")
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        use std::fs;

        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|err| {
                warn!(
                    "Failed to parse {:?} ({}). Falling back to default pipeline settings.",
                    path, err
                );
                PipelineSettings::default()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Pipeline settings file {:?} not found. Using default settings.",
                    path
                );
                PipelineSettings::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default pipeline settings.",
                    path, err
                );
                PipelineSettings::default()
            }
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let settings = serde_json::from_str::<PipelineSettings>(json)?;
        info!("Loaded pipeline settings");
        Ok(settings.validate())
    }

    fn validate(mut self) -> Self {
        if self.background_color.iter().any(|c| !c.is_finite()) {
            warn!("Background color must be finite. Using default color.");
            self.background_color = Self::default_background_color();
        }
        self.background_color = self.background_color.map(|c| c.clamp(0.0, 1.0));

        self.reflectiveness = unit_interval("Reflectiveness", self.reflectiveness, Self::default_reflectiveness());
        self.sharpen = unit_interval("Sharpen", self.sharpen, Self::default_sharpen());

        if self.resolution.width == 0 || self.resolution.height == 0 {
            warn!("Resolution must be greater than zero. Using default resolution.");
            self.resolution = Resolution::default();
        }

        self
    }

    pub fn present_mode(&self, available: &[wgpu::PresentMode]) -> wgpu::PresentMode {
        let desired = self.present_mode.to_wgpu();
        if available.contains(&desired) {
            return desired;
        }

        warn!(
            "Requested present mode {:?} is not supported. Falling back to FIFO.",
            desired
        );

        if available.contains(&wgpu::PresentMode::Fifo) {
            wgpu::PresentMode::Fifo
        } else {
            available
                .first()
                .copied()
                .unwrap_or(wgpu::PresentMode::Fifo)
        }
    }

    const fn default_background_color() -> [f32; 3] {
        [1.0, 1.0, 0.0]
    }

    const fn default_fxaa() -> bool {
        true
    }

    const fn default_reflectiveness() -> f32 {
        0.5
    }

    const fn default_sharpen() -> f32 {
        0.0
    }
}

fn unit_interval(name: &str, value: f32, default: f32) -> f32 {
    if !value.is_finite() {
        warn!("{} must be a number. Using {}.", name, default);
        return default;
    }
    if !(0.0..=1.0).contains(&value) {
        warn!("{} {} is outside 0..=1 and will be clamped.", name, value);
    }
    value.clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeSetting {
    #[default]
    Fifo,
    FifoRelaxed,
    Immediate,
    Mailbox,
    AutoVsync,
    AutoNoVsync,
}

impl PresentModeSetting {
    fn to_wgpu(&self) -> wgpu::PresentMode {
        match self {
            PresentModeSetting::Fifo => wgpu::PresentMode::Fifo,
            PresentModeSetting::FifoRelaxed => wgpu::PresentMode::FifoRelaxed,
            PresentModeSetting::Immediate => wgpu::PresentMode::Immediate,
            PresentModeSetting::Mailbox => wgpu::PresentMode::Mailbox,
            PresentModeSetting::AutoVsync => wgpu::PresentMode::AutoVsync,
            PresentModeSetting::AutoNoVsync => wgpu::PresentMode::AutoNoVsync,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let settings = PipelineSettings::from_json(r#"{ "fxaa": false }"#).unwrap();
        assert!(!settings.fxaa);
        assert_eq!(settings.background_color, [1.0, 1.0, 0.0]);
        assert_eq!(settings.reflectiveness, 0.5);
        assert_eq!(settings.resolution.width, 1280);
    }

    #[test]
    fn validate_clamps_strengths() {
        let settings = PipelineSettings {
            reflectiveness: 1.5,
            sharpen: -0.2,
            ..PipelineSettings::default()
        }
        .validate();

        assert_eq!(settings.reflectiveness, 1.0);
        assert_eq!(settings.sharpen, 0.0);
    }

    #[test]
    fn validate_replaces_invalid_values_with_defaults() {
        let settings = PipelineSettings {
            background_color: [f32::NAN, 0.0, 0.0],
            reflectiveness: f32::INFINITY,
            resolution: Resolution {
                width: 0,
                height: 600,
            },
            ..PipelineSettings::default()
        }
        .validate();

        assert_eq!(settings.background_color, [1.0, 1.0, 0.0]);
        assert_eq!(settings.reflectiveness, 0.5);
        assert_eq!(settings.resolution.width, 1280);
        assert_eq!(settings.resolution.height, 720);
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("robo_render_bad_settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        let settings = PipelineSettings::load_from_path(&path);
        std::fs::remove_file(&path).ok();

        assert!(settings.fxaa);
        assert_eq!(settings.sharpen, 0.0);
    }

    #[test]
    fn present_mode_falls_back_to_fifo_when_desired_missing() {
        let settings = PipelineSettings {
            present_mode: PresentModeSetting::Mailbox,
            ..PipelineSettings::default()
        };

        let available = [wgpu::PresentMode::Fifo, wgpu::PresentMode::Immediate];

        assert_eq!(settings.present_mode(&available), wgpu::PresentMode::Fifo);
    }

    #[test]
    fn present_mode_uses_first_available_when_fifo_missing() {
        let settings = PipelineSettings {
            present_mode: PresentModeSetting::Mailbox,
            ..PipelineSettings::default()
        };

        assert_eq!(
            settings.present_mode(&[wgpu::PresentMode::Immediate]),
            wgpu::PresentMode::Immediate
        );
    }
}
