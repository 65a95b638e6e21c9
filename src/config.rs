use crate::centroid::DEFAULT_Z_OFFSET_WARNING_MM;
use crate::enums::{CentroidStrategy, StackOrder};

/// Tunables of a [`RegistrationSession`](crate::session::RegistrationSession).
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub centroid_strategy: CentroidStrategy,
    /// Origin Z offsets above this (mm) are logged as suspicious. Never fatal.
    pub z_offset_warning_mm: f64,
    /// Stage every output in a directory inside the output directory and move
    /// it into place only once all requested stages succeeded.
    pub staged_writes: bool,
    /// Use the file-size outlier hint to rank RTSTRUCT candidates.
    pub size_heuristic: bool,
    pub instance_order: StackOrder,
    pub image_dir_name: String,
    pub rtss_file_name: String,
    pub series_description: String,
    pub series_number: i32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            centroid_strategy: CentroidStrategy::PointAverage,
            z_offset_warning_mm: DEFAULT_Z_OFFSET_WARNING_MM,
            staged_writes: true,
            size_heuristic: true,
            instance_order: StackOrder::Ascending,
            image_dir_name: "transformed_image".to_string(),
            rtss_file_name: "transformed_rtss.dcm".to_string(),
            series_description: "Rigid Transformed Image".to_string(),
            series_number: 100,
        }
    }
}

impl SessionConfig {
    pub fn with_centroid_strategy(mut self, strategy: CentroidStrategy) -> Self {
        self.centroid_strategy = strategy;
        self
    }

    pub fn with_z_offset_warning(mut self, mm: f64) -> Self {
        self.z_offset_warning_mm = mm;
        self
    }

    pub fn with_staged_writes(mut self, staged: bool) -> Self {
        self.staged_writes = staged;
        self
    }

    pub fn with_size_heuristic(mut self, enabled: bool) -> Self {
        self.size_heuristic = enabled;
        self
    }

    pub fn with_instance_order(mut self, order: StackOrder) -> Self {
        self.instance_order = order;
        self
    }

    pub fn with_series_description(mut self, description: impl Into<String>) -> Self {
        self.series_description = description.into();
        self
    }

    pub fn with_series_number(mut self, number: i32) -> Self {
        self.series_number = number;
        self
    }
}
