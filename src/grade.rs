use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Letter {
    A,
    B,
    C,
    D,
    F,
}

impl Letter {
    pub fn as_str(self) -> &'static str {
        match self {
            Letter::A => "A",
            Letter::B => "B",
            Letter::C => "C",
            Letter::D => "D",
            Letter::F => "F",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GradeResult {
    pub grade: Letter,
    pub comment: &'static str,
}

/// Inclusive lower bounds, highest first.
const GRADE_BANDS: [(f64, Letter, &str); 4] = [
    (75.0, Letter::A, "Excellent"),
    (65.0, Letter::B, "Very Good"),
    (50.0, Letter::C, "Good"),
    (40.0, Letter::D, "Fair"),
];

/// Maps a subject total to its band. No clamping: out-of-range totals fall
/// through the same ladder, and NaN lands on F.
pub fn grade(total: f64) -> GradeResult {
    for (floor, letter, comment) in GRADE_BANDS {
        if total >= floor {
            return GradeResult {
                grade: letter,
                comment,
            };
        }
    }
    GradeResult {
        grade: Letter::F,
        comment: "Fail",
    }
}
