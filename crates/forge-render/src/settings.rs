// SPDX-License-Identifier: CEPL-1.0
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentPreference {
    /// Mailbox when offered (no tearing, uncapped), FIFO otherwise.
    #[default]
    LowLatency,
    /// Always FIFO (vsync-style blocking present).
    Fifo,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Follow the engine debug flag; a missing layer only disables validation.
    #[default]
    Auto,
    /// Validation must be available, startup fails otherwise.
    Required,
    Off,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityLevel {
    Verbose,
    Info,
    #[default]
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub frames_in_flight: usize,
    pub fence_timeout_ms: u64,
    pub present_mode: PresentPreference,
    pub clear_color: [f32; 4],
    pub validation: ValidationMode,
    /// Lowest validation severity forwarded to the log.
    pub validation_severity: SeverityLevel,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub pipeline_cache: Option<PathBuf>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            fence_timeout_ms: 5_000,
            present_mode: PresentPreference::default(),
            clear_color: [0.02, 0.02, 0.04, 1.0],
            validation: ValidationMode::default(),
            validation_severity: SeverityLevel::default(),
            vertex_shader: PathBuf::from("shaders/mesh.vert.spv"),
            fragment_shader: PathBuf::from("shaders/mesh.frag.spv"),
            pipeline_cache: None,
        }
    }
}

impl RenderSettings {
    pub fn fence_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.fence_timeout_ms)
    }

    /// At least one slot, however the config was written.
    pub fn slot_count(&self) -> usize {
        self.frames_in_flight.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn render_table_parses_snake_case() {
        let s: RenderSettings = toml::from_str(
            r#"
            frames_in_flight = 3
            present_mode = "fifo"
            validation = "required"
            validation_severity = "info"
            "#,
        )
        .unwrap();

        assert_eq!(s.frames_in_flight, 3);
        assert_eq!(s.present_mode, PresentPreference::Fifo);
        assert_eq!(s.validation, ValidationMode::Required);
        assert_eq!(s.validation_severity, SeverityLevel::Info);
        assert_eq!(s.fence_timeout_ms, 5_000);
    }

    #[test]
    fn zero_frames_in_flight_still_yields_a_slot() {
        let s = RenderSettings {
            frames_in_flight: 0,
            ..Default::default()
        };
        assert_eq!(s.slot_count(), 1);
    }

    #[test]
    fn severity_orders_from_verbose_to_error() {
        assert!(SeverityLevel::Verbose < SeverityLevel::Info);
        assert!(SeverityLevel::Warning < SeverityLevel::Error);
    }
}
