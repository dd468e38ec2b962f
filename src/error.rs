use thiserror::Error;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Fault type for model construction and simulation.
///
/// Construction faults (`InvalidParam`, `DegenerateShape`, `Overlap`, `Intersection`) are raised
/// while assembling a model, before any step runs. `Physics` is raised by the engine when a
/// phonon reaches a state that cannot be continued; the run is aborted.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid user or API parameter.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// Zero-length line, zero-area triangle or cell.
    #[error("degenerate shape: {0}")]
    DegenerateShape(String),

    /// Two segments share more than an endpoint, or two regions overlap.
    #[error("overlap fault: {0}")]
    Overlap(String),

    /// Two segments cross in their interiors.
    #[error("intersection fault: {0}")]
    Intersection(String),

    /// Runtime physical-invariant violation (zero direction, untraceable phonon, energy imbalance).
    #[error("physics fault: {0}")]
    Physics(String),
}

impl Error {
    /// True for faults raised while building a model.
    pub fn is_construction_fault(&self) -> bool {
        !matches!(self, Error::Physics(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_is_informative() {
        let e = Error::InvalidParam("specularity must be in [0, 1]".to_string());
        let msg = format!("{e}");
        assert!(msg.contains("invalid parameter"));
        assert!(msg.contains("specularity"));
    }

    #[test]
    fn fault_classes() {
        assert!(Error::Overlap("a".into()).is_construction_fault());
        assert!(Error::DegenerateShape("b".into()).is_construction_fault());
        assert!(!Error::Physics("c".into()).is_construction_fault());
    }

    #[test]
    fn result_type_alias_compiles() -> Result<()> {
        Ok(())
    }
}
