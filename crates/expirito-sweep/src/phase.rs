use serde::Serialize;

/// Stage of a sweep. A run moves through these in declaration order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, strum::Display, strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    ScanningMonitored,
    RelocatingExpired,
    PruningMonitored,
    ScanningHolding,
    DeletingExpired,
    PruningHolding,
    Done,
}

impl Phase {
    /// The phase that follows this one.
    pub fn next(self) -> Self {
        match self {
            Self::Idle => Self::ScanningMonitored,
            Self::ScanningMonitored => Self::RelocatingExpired,
            Self::RelocatingExpired => Self::PruningMonitored,
            Self::PruningMonitored => Self::ScanningHolding,
            Self::ScanningHolding => Self::DeletingExpired,
            Self::DeletingExpired => Self::PruningHolding,
            Self::PruningHolding | Self::Done => Self::Done,
        }
    }
}
