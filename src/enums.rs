#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Interpolation {
    /// Intensity images.
    #[default]
    Linear,
    /// Label maps and binary masks. Never produces values absent from the input.
    NearestNeighbor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Fixed,
    Moving,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::Fixed => "fixed",
            Role::Moving => "moving",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CentroidStrategy {
    /// Arithmetic mean of every contour point.
    #[default]
    PointAverage,
    /// Polygon centroids weighted by contour area.
    AreaWeighted,
}

/// Output slice order along the stack normal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StackOrder {
    #[default]
    Ascending,
    Descending,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    FixedLoaded,
    MovingLoaded,
    BothLoaded,
    ParamsSet,
    Executing,
    Done,
    Error,
}
