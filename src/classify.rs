/// Expected number of enrollment rows one normal class instance leaves in the
/// table. Whether 2-3 is a real institutional invariant or just what the
/// sampled data shows is unknown, so it stays overridable from the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrollmentFootprint {
    pub min: u32,
    pub max: u32,
}

impl Default for EnrollmentFootprint {
    fn default() -> Self {
        EnrollmentFootprint { min: 2, max: 3 }
    }
}

/// Bucket for one student's prior-enrollment row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Footprint of one normal class instance; safe to update.
    Matched,
    /// More rows than one instance leaves behind. The student likely repeated
    /// the class in another term and a blind pattern update could land on the
    /// wrong attempt, so they are excluded from automatic update.
    Skipped,
    /// Too few rows to be confident the enrollment is there at all.
    Unmatched,
}

pub fn classify(count: u32, footprint: EnrollmentFootprint) -> Verdict {
    if count >= footprint.min && count <= footprint.max {
        Verdict::Matched
    } else if count > footprint.max {
        Verdict::Skipped
    } else {
        Verdict::Unmatched
    }
}
